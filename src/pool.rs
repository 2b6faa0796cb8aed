//! # Entity Pool
//!
//! A fixed-capacity pool of uniquely identified worker entities.
//!
//! The pool bounds concurrency for one resource class: at most `total`
//! entities can be checked out at once, and [`EntityPool::take`] waits while
//! the pool is exhausted. Every entity's id is tracked in an availability map
//! so misuse is reported instead of silently corrupting the pool:
//!
//! - returning an entity that is not checked out yields [`CrawlerError::DoubleReturn`];
//! - returning an entity this pool never issued yields [`CrawlerError::UnknownEntity`].
//!
//! The pool is generic over the entity type, so an entity of the wrong type
//! cannot be handed back in the first place.

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{error, trace, warn};

use crate::error::CrawlerError;

/// Something that can live in an [`EntityPool`].
pub trait Entity: Send + Sync {
    fn id(&self) -> u32;
}

impl<T: Entity + ?Sized> Entity for Box<T> {
    fn id(&self) -> u32 {
        (**self).id()
    }
}

impl<T: Entity + ?Sized> Entity for Arc<T> {
    fn id(&self) -> u32 {
        (**self).id()
    }
}

/// Wrapping `u32` sequence for entity ids.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU32,
}

impl IdGenerator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
        }
    }

    /// Returns the next id, wrapping to zero after `u32::MAX`.
    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// A fixed-capacity pool of entities.
pub struct EntityPool<E: Entity> {
    total: u32,
    idle: Mutex<VecDeque<E>>,
    permits: Semaphore,
    // id -> available
    availability: Mutex<HashMap<u32, bool>>,
}

impl<E: Entity> EntityPool<E> {
    /// Builds a pool holding `total` entities created by `factory`.
    ///
    /// Fails with [`CrawlerError::Config`] when `total` is zero or when the
    /// factory produces two entities with the same id.
    pub fn new<F>(total: u32, mut factory: F) -> Result<Self, CrawlerError>
    where
        F: FnMut() -> E,
    {
        if total == 0 {
            return Err(CrawlerError::Config(
                "the pool capacity must be greater than 0".to_string(),
            ));
        }

        let mut idle = VecDeque::with_capacity(total as usize);
        let mut availability = HashMap::with_capacity(total as usize);
        for _ in 0..total {
            let entity = factory();
            let id = entity.id();
            if availability.insert(id, true).is_some() {
                return Err(CrawlerError::Config(format!(
                    "the entity factory produced duplicate id {}",
                    id
                )));
            }
            idle.push_back(entity);
        }

        Ok(Self {
            total,
            idle: Mutex::new(idle),
            permits: Semaphore::new(total as usize),
            availability: Mutex::new(availability),
        })
    }

    /// Checks an entity out, waiting while every entity is in use.
    pub async fn take(&self) -> Result<E, CrawlerError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CrawlerError::PoolUnavailable("the pool is closed".to_string()))?;

        let entity = self.idle.lock().pop_front().ok_or_else(|| {
            CrawlerError::PoolUnavailable("the pool has no idle entity".to_string())
        })?;
        permit.forget();

        let id = entity.id();
        let mut availability = self.availability.lock();
        match availability.get_mut(&id) {
            Some(available) if *available => *available = false,
            Some(_) => error!("Entity {} was idle but already marked as checked out", id),
            None => error!("Entity {} was idle but is unknown to the pool", id),
        }
        trace!("Entity {} taken from pool", id);
        Ok(entity)
    }

    /// Returns a checked-out entity to the pool.
    pub fn give_back(&self, entity: E) -> Result<(), CrawlerError> {
        let id = entity.id();
        {
            let mut availability = self.availability.lock();
            match availability.get_mut(&id) {
                None => return Err(CrawlerError::UnknownEntity(id)),
                Some(available) if *available => return Err(CrawlerError::DoubleReturn(id)),
                Some(available) => *available = true,
            }
        }
        self.idle.lock().push_back(entity);
        self.permits.add_permits(1);
        trace!("Entity {} returned to pool", id);
        Ok(())
    }

    /// Capacity of the pool.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Number of entities currently checked out.
    pub fn used(&self) -> u32 {
        self.availability
            .lock()
            .values()
            .filter(|available| !**available)
            .count() as u32
    }

    /// Number of entities currently available.
    pub fn available(&self) -> u32 {
        self.availability
            .lock()
            .values()
            .filter(|available| **available)
            .count() as u32
    }

    /// Closes the pool. Pending and future `take` calls fail with
    /// [`CrawlerError::PoolUnavailable`]; returns are still accepted.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

impl<E: Entity + 'static> EntityPool<E> {
    /// Takes an entity wrapped in a guard that gives it back when dropped,
    /// including when the holder unwinds.
    pub async fn checkout(self: &Arc<Self>) -> Result<Pooled<E>, CrawlerError> {
        let entity = self.take().await?;
        Ok(Pooled {
            pool: Arc::clone(self),
            entity: Some(entity),
        })
    }
}

/// An entity checked out of an [`EntityPool`].
pub struct Pooled<E: Entity + 'static> {
    pool: Arc<EntityPool<E>>,
    entity: Option<E>,
}

impl<E: Entity + 'static> Pooled<E> {
    /// Gives the entity back now, surfacing any pool error to the caller.
    pub fn release(mut self) -> Result<(), CrawlerError> {
        match self.entity.take() {
            Some(entity) => self.pool.give_back(entity),
            None => Ok(()),
        }
    }
}

impl<E: Entity + 'static> Deref for Pooled<E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.entity
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled entity accessed after release"))
    }
}

impl<E: Entity + 'static> DerefMut for Pooled<E> {
    fn deref_mut(&mut self) -> &mut E {
        self.entity
            .as_mut()
            .unwrap_or_else(|| unreachable!("pooled entity accessed after release"))
    }
}

impl<E: Entity + 'static> Drop for Pooled<E> {
    fn drop(&mut self) {
        if let Some(entity) = self.entity.take() {
            if let Err(e) = self.pool.give_back(entity) {
                warn!("Failed to give entity back to pool on drop: {}", e);
            }
        }
    }
}
