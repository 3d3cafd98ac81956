//! Persistent document store using sled
//!
//! Users and groups live in separate trees keyed by their name, values are
//! postcard-encoded documents. Inserts and updates are compare-and-swap, so
//! concurrent handlers never lose each other's writes.

use groupcast_core::types::{Group, User};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use std::path::Path;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}

/// Document store of a replica
pub struct Storage {
    db: Db,
    /// username -> User
    users: Tree,
    /// groupname -> Group
    groups: Tree,
}

impl Storage {
    /// Open storage at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let users = db.open_tree("users")?;
        let groups = db.open_tree("groups")?;

        Ok(Self { db, users, groups })
    }

    /// Insert a user; returns false if the username is taken
    pub fn insert_user(&self, user: &User) -> Result<bool, StorageError> {
        insert_new(&self.users, &user.username, user)
    }

    /// Number of users with this username (0 or 1)
    pub fn count_users(&self, username: &str) -> Result<usize, StorageError> {
        Ok(usize::from(self.users.contains_key(username)?))
    }

    pub fn find_user(&self, username: &str) -> Result<Option<User>, StorageError> {
        find(&self.users, username)
    }

    /// Apply `f` to a stored user; `None` if there is no such user
    pub fn update_user<F>(&self, username: &str, f: F) -> Result<Option<User>, StorageError>
    where
        F: FnMut(&mut User),
    {
        update(&self.users, username, f)
    }

    /// Insert a group; returns false if the name is taken
    pub fn insert_group(&self, group: &Group) -> Result<bool, StorageError> {
        insert_new(&self.groups, &group.name, group)
    }

    pub fn find_group(&self, name: &str) -> Result<Option<Group>, StorageError> {
        find(&self.groups, name)
    }

    /// Every group, ordered by name
    pub fn list_groups(&self) -> Result<Vec<Group>, StorageError> {
        self.groups
            .iter()
            .map(|result| {
                let (_, bytes) = result?;
                Ok(postcard::from_bytes(&bytes)?)
            })
            .collect()
    }

    /// Apply `f` to a stored group; `None` if there is no such group
    pub fn update_group<F>(&self, name: &str, f: F) -> Result<Option<Group>, StorageError>
    where
        F: FnMut(&mut Group),
    {
        update(&self.groups, name, f)
    }

    /// Flush all pending writes
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn find<T: DeserializeOwned>(tree: &Tree, key: &str) -> Result<Option<T>, StorageError> {
    match tree.get(key)? {
        Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

fn insert_new<T: Serialize>(tree: &Tree, key: &str, value: &T) -> Result<bool, StorageError> {
    let encoded = postcard::to_allocvec(value)?;
    let swapped = tree.compare_and_swap(key, None::<&[u8]>, Some(encoded))?;
    Ok(swapped.is_ok())
}

/// Read-modify-write retried until no concurrent writer got in between
fn update<T, F>(tree: &Tree, key: &str, mut f: F) -> Result<Option<T>, StorageError>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(&mut T),
{
    loop {
        let Some(current) = tree.get(key)? else {
            return Ok(None);
        };
        let mut value: T = postcard::from_bytes(&current)?;
        f(&mut value);
        let encoded = postcard::to_allocvec(&value)?;

        if tree
            .compare_and_swap(key, Some(current), Some(encoded))?
            .is_ok()
        {
            return Ok(Some(value));
        }
    }
}
