//! Extendible hash table over buffer pool pages.

use std::hash::{Hash, Hasher};

use granite_common::types::{PageId, Rid};
use granite_common::{HASH_DIRECTORY_MAX_DEPTH, HASH_HEADER_MAX_DEPTH, PAGE_SIZE};

use super::error::{HashError, HashResult};
use super::pages::{BucketPage, DirectoryPage, HeaderPage};
use crate::btree::IndexKey;
use crate::buffer::{BufferError, BufferPool, PageReadGuard, PageWriteGuard};

/// A disk-backed extendible hash index with unique-key semantics.
///
/// Mutating operations serialize on the header page's writer latch and
/// then descend; the bounded directory makes that coarse granularity
/// acceptable.
pub struct HashIndex<K: IndexKey + Hash> {
    pool: BufferPool,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,
    _marker: std::marker::PhantomData<K>,
}

impl<K: IndexKey + Hash> HashIndex<K> {
    /// Creates an index, initializing its header page.
    pub fn new(
        pool: BufferPool,
        header_page_id: PageId,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> HashResult<Self> {
        assert!(header_max_depth <= HASH_HEADER_MAX_DEPTH);
        assert!(directory_max_depth <= HASH_DIRECTORY_MAX_DEPTH);
        assert!(bucket_max_size >= 1);
        {
            let mut guard = pool
                .checked_write_page(header_page_id)
                .ok_or(BufferError::OutOfMemory)?;
            HeaderPage::init(&mut guard[..], header_max_depth);
        }
        Ok(Self {
            pool,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            _marker: std::marker::PhantomData,
        })
    }

    /// Creates an index with depths and bucket capacity derived from the
    /// page size.
    pub fn with_default_depths(pool: BufferPool, header_page_id: PageId) -> HashResult<Self> {
        let bucket_max = BucketPage::<&[u8], K>::capacity_for(PAGE_SIZE) as u32;
        Self::new(
            pool,
            header_page_id,
            HASH_HEADER_MAX_DEPTH,
            HASH_DIRECTORY_MAX_DEPTH,
            bucket_max,
        )
    }

    fn read(&self, page_id: PageId) -> HashResult<PageReadGuard> {
        self.pool
            .checked_read_page(page_id)
            .ok_or_else(|| BufferError::OutOfMemory.into())
    }

    fn write(&self, page_id: PageId) -> HashResult<PageWriteGuard> {
        self.pool
            .checked_write_page(page_id)
            .ok_or_else(|| BufferError::OutOfMemory.into())
    }

    fn hash_of(key: &K) -> u32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }

    /// Point lookup: header, directory, then a linear bucket scan.
    pub fn get_value(&self, key: &K) -> Option<Rid> {
        let hash = Self::hash_of(key);

        let directory_page_id = {
            let guard = self.pool.read_page(self.header_page_id);
            let header = HeaderPage::new(&guard[..]);
            header.directory_page_id(header.directory_index(hash))
        };
        if !directory_page_id.is_valid() {
            return None;
        }

        let bucket_page_id = {
            let guard = self.pool.read_page(directory_page_id);
            let directory = DirectoryPage::new(&guard[..]);
            directory.bucket_page_id(directory.bucket_index(hash))
        };
        if !bucket_page_id.is_valid() {
            return None;
        }

        let guard = self.pool.read_page(bucket_page_id);
        BucketPage::<_, K>::new(&guard[..]).lookup(key)
    }

    /// Inserts a unique key.
    ///
    /// A full bucket splits, doubling the directory when its local depth
    /// has caught up with the global depth, and the insert retries.
    pub fn insert(&self, key: &K, rid: Rid) -> HashResult<()> {
        if self.get_value(key).is_some() {
            return Err(HashError::DuplicateKey);
        }
        let hash = Self::hash_of(key);
        loop {
            if self.try_insert(hash, key, rid)? {
                return Ok(());
            }
        }
    }

    /// One insert attempt; `Ok(false)` means a bucket was split and the
    /// caller should retry.
    fn try_insert(&self, hash: u32, key: &K, rid: Rid) -> HashResult<bool> {
        let mut header_guard = self.write(self.header_page_id)?;
        let directory_index = HeaderPage::new(&header_guard[..]).directory_index(hash);
        let directory_page_id =
            HeaderPage::new(&header_guard[..]).directory_page_id(directory_index);

        if !directory_page_id.is_valid() {
            // First key of this header slot: allocate the directory and
            // its first bucket while the header stays latched.
            let directory_id = self.pool.new_page()?;
            let mut directory_guard = self.write(directory_id)?;
            let mut directory =
                DirectoryPage::init(&mut directory_guard[..], self.directory_max_depth);
            HeaderPage::new(&mut header_guard[..])
                .set_directory_page_id(directory_index, directory_id);

            let bucket_index = directory.bucket_index(hash);
            let bucket_id = self.pool.new_page()?;
            let mut bucket_guard = self.write(bucket_id)?;
            let mut bucket = BucketPage::<_, K>::init(&mut bucket_guard[..], self.bucket_max_size);
            directory.set_bucket_page_id(bucket_index, bucket_id);
            directory.set_local_depth(bucket_index, 0);
            bucket.insert(key, rid);
            return Ok(true);
        }
        drop(header_guard);

        let mut directory_guard = self.write(directory_page_id)?;
        let (bucket_index, bucket_page_id) = {
            let directory = DirectoryPage::new(&directory_guard[..]);
            let index = directory.bucket_index(hash);
            (index, directory.bucket_page_id(index))
        };

        if !bucket_page_id.is_valid() {
            let bucket_id = self.pool.new_page()?;
            let mut bucket_guard = self.write(bucket_id)?;
            let mut bucket = BucketPage::<_, K>::init(&mut bucket_guard[..], self.bucket_max_size);
            let mut directory = DirectoryPage::new(&mut directory_guard[..]);
            directory.set_bucket_page_id(bucket_index, bucket_id);
            directory.set_local_depth(bucket_index, 0);
            bucket.insert(key, rid);
            return Ok(true);
        }

        let mut bucket_guard = self.write(bucket_page_id)?;
        {
            let mut bucket = BucketPage::<_, K>::new(&mut bucket_guard[..]);
            if bucket.insert(key, rid) {
                return Ok(true);
            }
        }

        // Full bucket. Grow the directory if its local depth has caught
        // up, split, and retry from the top.
        {
            let mut directory = DirectoryPage::new(&mut directory_guard[..]);
            if directory.local_depth(bucket_index) == directory.global_depth() {
                if directory.global_depth() >= directory.max_depth() {
                    return Err(HashError::DirectoryFull);
                }
                directory.incr_global_depth();
            }
        }
        self.split_bucket(&mut directory_guard, &mut bucket_guard, bucket_index, bucket_page_id)?;
        Ok(false)
    }

    /// Splits a full bucket under the new discriminating bit, rewriting
    /// every directory slot that pointed at it.
    fn split_bucket(
        &self,
        directory_guard: &mut PageWriteGuard,
        bucket_guard: &mut PageWriteGuard,
        bucket_index: u32,
        old_page_id: PageId,
    ) -> HashResult<()> {
        let new_bucket_id = self.pool.new_page()?;
        let mut new_bucket_guard = self.write(new_bucket_id)?;
        let mut new_bucket =
            BucketPage::<_, K>::init(&mut new_bucket_guard[..], self.bucket_max_size);

        let mut directory = DirectoryPage::new(&mut directory_guard[..]);
        let old_local = directory.local_depth(bucket_index);
        let new_local = old_local + 1;
        debug_assert!(new_local <= directory.global_depth());
        let mask = (1u32 << new_local) - 1;
        let stays = bucket_index & mask;

        for i in 0..directory.size() {
            if directory.bucket_page_id(i) != old_page_id {
                continue;
            }
            if i & mask == stays {
                directory.set_local_depth(i, new_local);
            } else {
                directory.set_bucket_page_id(i, new_bucket_id);
                directory.set_local_depth(i, new_local);
            }
        }

        // Rehash under the new mapping; entries whose new bit is unset
        // stay in the old bucket.
        let mut old_bucket = BucketPage::<_, K>::new(&mut bucket_guard[..]);
        let entries = old_bucket.entries();
        old_bucket.clear();
        for (entry_key, entry_rid) in entries {
            let entry_hash = Self::hash_of(&entry_key);
            let slot = directory.bucket_index(entry_hash);
            if directory.bucket_page_id(slot) == old_page_id {
                old_bucket.insert(&entry_key, entry_rid);
            } else {
                new_bucket.insert(&entry_key, entry_rid);
            }
        }
        tracing::debug!(old = %old_page_id, new = %new_bucket_id, "bucket split");
        Ok(())
    }

    /// Removes a key, returning whether it was present. Empty buckets
    /// merge with their split image while depths allow, and the directory
    /// shrinks when every local depth sits below the global depth.
    pub fn remove(&self, key: &K) -> HashResult<bool> {
        let hash = Self::hash_of(key);

        let header_guard = self.write(self.header_page_id)?;
        let directory_page_id = {
            let header = HeaderPage::new(&header_guard[..]);
            header.directory_page_id(header.directory_index(hash))
        };
        if !directory_page_id.is_valid() {
            return Ok(false);
        }
        drop(header_guard);

        let mut directory_guard = self.write(directory_page_id)?;
        let (bucket_index, bucket_page_id) = {
            let directory = DirectoryPage::new(&directory_guard[..]);
            let index = directory.bucket_index(hash);
            (index, directory.bucket_page_id(index))
        };
        if !bucket_page_id.is_valid() {
            return Ok(false);
        }

        let removed = {
            let mut bucket_guard = self.write(bucket_page_id)?;
            BucketPage::<_, K>::new(&mut bucket_guard[..]).remove(key)
        };
        if !removed {
            return Ok(false);
        }

        // Iterative merge with the split image.
        loop {
            let directory = DirectoryPage::new(&directory_guard[..]);
            let local = directory.local_depth(bucket_index);
            if local == 0 {
                break;
            }
            let image_index = bucket_index ^ (1 << (local - 1));
            let image_local = directory.local_depth(image_index);
            let image_page_id = directory.bucket_page_id(image_index);
            let current_page_id = directory.bucket_page_id(bucket_index);
            if !image_page_id.is_valid()
                || image_page_id == current_page_id
                || image_local != local
            {
                break;
            }

            let current_empty = {
                let guard = self.read(current_page_id)?;
                BucketPage::<_, K>::new(&guard[..]).is_empty()
            };
            let image_empty = {
                let guard = self.read(image_page_id)?;
                BucketPage::<_, K>::new(&guard[..]).is_empty()
            };
            if !current_empty && !image_empty {
                break;
            }

            let (survivor, dead) = if current_empty {
                (image_page_id, current_page_id)
            } else {
                (current_page_id, image_page_id)
            };

            let new_local = local - 1;
            let mut directory = DirectoryPage::new(&mut directory_guard[..]);
            for i in 0..directory.size() {
                let page_id = directory.bucket_page_id(i);
                if page_id == dead || page_id == survivor {
                    directory.set_bucket_page_id(i, survivor);
                    directory.set_local_depth(i, new_local);
                }
            }
            tracing::debug!(%dead, %survivor, "buckets merged");
            let _ = self.pool.delete_page(dead)?;
        }

        {
            let mut directory = DirectoryPage::new(&mut directory_guard[..]);
            while directory.can_shrink() {
                directory.decr_global_depth();
            }
        }
        Ok(true)
    }

    /// Checks the directory invariants of every allocated directory page.
    ///
    /// # Panics
    ///
    /// Panics on violation; intended for tests and debugging.
    pub fn verify_integrity(&self) {
        let header_guard = self.pool.read_page(self.header_page_id);
        let header = HeaderPage::new(&header_guard[..]);
        for i in 0..header.max_size() {
            let directory_page_id = header.directory_page_id(i);
            if !directory_page_id.is_valid() {
                continue;
            }
            let guard = self.pool.read_page(directory_page_id);
            DirectoryPage::new(&guard[..]).verify_integrity();
        }
    }

    /// Global depth of the directory serving `key`'s hash, if allocated.
    pub fn directory_depth_for(&self, key: &K) -> Option<u32> {
        let hash = Self::hash_of(key);
        let guard = self.pool.read_page(self.header_page_id);
        let header = HeaderPage::new(&guard[..]);
        let directory_page_id = header.directory_page_id(header.directory_index(hash));
        if !directory_page_id.is_valid() {
            return None;
        }
        let guard = self.pool.read_page(directory_page_id);
        Some(DirectoryPage::new(&guard[..]).global_depth())
    }
}

impl<K: IndexKey + Hash> std::fmt::Debug for HashIndex<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashIndex")
            .field("header_page_id", &self.header_page_id)
            .field("directory_max_depth", &self.directory_max_depth)
            .field("bucket_max_size", &self.bucket_max_size)
            .finish()
    }
}
