use core::borrow::Borrow;
use core::fmt;
use core::hash::BuildHasher;
use core::hash::Hash;
use std::collections::hash_map::RandomState;

use slotmap::DefaultKey;
use slotmap::SlotMap;

use crate::table::HopTable;
use crate::table::MIN_NEIGHBORHOOD;

/// Errors surfaced by the fallible map operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// [`HopMap::at`] was called with a key that is not in the map.
    NotFound,
    /// A replacement bucket table could not be allocated while growing.
    /// The map is unchanged; retrying after freeing memory is fine.
    OutOfMemory,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => f.write_str("key not found"),
            Error::OutOfMemory => f.write_str("bucket table allocation failed"),
        }
    }
}

impl std::error::Error for Error {}

/// A stable reference to one entry of a [`HopMap`].
///
/// Handles are small `Copy` tokens backed by generational slots: a handle
/// stays valid across insertion and removal of *other* keys and across table
/// growth, and resolves to `None` once its entry has been removed. A slot
/// reused by a later insertion gets a fresh generation, so a stale handle
/// never aliases the new occupant.
///
/// # Examples
///
/// ```
/// use hopchain::HopMap;
///
/// let mut map = HopMap::new();
/// let handle = map.insert("pi", 3)?;
/// map.insert("e", 2)?;
///
/// assert_eq!(handle.value(&map), Some(&3));
/// map.remove("pi");
/// assert_eq!(handle.value(&map), None);
/// # Ok::<(), hopchain::Error>(())
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

impl Handle {
    /// Returns the key of the referenced entry, or `None` if it was removed.
    pub fn key<'a, K, V, S>(&self, map: &'a HopMap<K, V, S>) -> Option<&'a K> {
        map.entries.get(self.0).map(|entry| &entry.key)
    }

    /// Returns the value of the referenced entry, or `None` if it was
    /// removed.
    pub fn value<'a, K, V, S>(&self, map: &'a HopMap<K, V, S>) -> Option<&'a V> {
        map.entries.get(self.0).map(|entry| &entry.value)
    }

    /// Returns the value of the referenced entry for in-place mutation, or
    /// `None` if it was removed.
    pub fn value_mut<'a, K, V, S>(&self, map: &'a mut HopMap<K, V, S>) -> Option<&'a mut V> {
        map.entries.get_mut(self.0).map(|entry| &mut entry.value)
    }
}

#[derive(Clone)]
struct Entry<K, V> {
    key: K,
    value: V,
    hash: u64,
}

/// A hash map using hopscotch placement with chained neighborhoods.
///
/// Entries live in a stable slot store and the bucket table holds only
/// handles, so displacement during insertion never moves keys or values and
/// [`Handle`]s survive any amount of rehashing. Lookups walk a single linked
/// chain of buckets, all within the neighborhood of the key's home bucket.
///
/// Insertion is first-come-first-served: inserting a key that is already
/// present keeps the stored value and returns the existing entry's handle.
///
/// The hasher defaults to [`RandomState`]; any [`BuildHasher`] can be
/// supplied with [`with_hasher`](HopMap::with_hasher), including degenerate
/// ones. A constant hash costs lookup time but nothing breaks, because the
/// neighborhood grows along with the table.
///
/// # Examples
///
/// ```
/// use hopchain::HopMap;
///
/// let mut map = HopMap::new();
/// map.insert("a", 1)?;
/// map.insert("b", 2)?;
/// map.insert("a", 99)?; // already present; 1 is kept
///
/// assert_eq!(map.get("a"), Some(&1));
/// assert_eq!(map.len(), 2);
/// # Ok::<(), hopchain::Error>(())
/// ```
#[derive(Clone)]
pub struct HopMap<K, V, S = RandomState> {
    hasher: S,
    table: HopTable,
    entries: SlotMap<DefaultKey, Entry<K, V>>,
}

impl<K, V> HopMap<K, V, RandomState>
where
    K: Eq + Hash,
{
    /// Creates an empty map with a randomly seeded default hasher.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, V> Default for HopMap<K, V, RandomState>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> HopMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Creates an empty map that hashes keys with `hasher`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::hash_map::RandomState;
    ///
    /// use hopchain::HopMap;
    ///
    /// let map: HopMap<i32, i32, _> = HopMap::with_hasher(RandomState::new());
    /// assert!(map.is_empty());
    /// ```
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            table: HopTable::new(),
            entries: SlotMap::with_key(),
        }
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the current number of buckets.
    ///
    /// This starts at the initial neighborhood size and only ever grows,
    /// by a factor of three per rebuild; removal never shrinks it.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns a reference to the configured hasher.
    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    fn hash_of<Q>(&self, key: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(key)
    }

    /// Bucket index and store slot for `key`, if present.
    fn locate<Q>(&self, key: &Q) -> Option<(usize, DefaultKey)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hash_of(key);
        self.table.find(hash, |slot| {
            self.entries
                .get(slot)
                .map(|entry| entry.key.borrow() == key)
                .unwrap_or(false)
        })
    }

    /// Inserts `key` mapped to `value` and returns the entry's handle.
    ///
    /// If the key is already present the map is unchanged, `value` is
    /// dropped, and the handle of the existing entry is returned. The only
    /// error is [`Error::OutOfMemory`], raised when a bigger bucket table
    /// cannot be allocated; in that case the map is left exactly as it was.
    ///
    /// # Examples
    ///
    /// ```
    /// use hopchain::HopMap;
    ///
    /// let mut map = HopMap::new();
    /// let first = map.insert(7, "first")?;
    /// let again = map.insert(7, "second")?;
    ///
    /// assert_eq!(first, again);
    /// assert_eq!(map.get(&7), Some(&"first"));
    /// # Ok::<(), hopchain::Error>(())
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Result<Handle, Error> {
        let hash = self.hash_of(&key);
        if let Some((_, slot)) = self.table.find(hash, |slot| {
            self.entries
                .get(slot)
                .map(|entry| entry.key == key)
                .unwrap_or(false)
        }) {
            return Ok(Handle(slot));
        }

        let slot = self.entries.insert(Entry { key, value, hash });
        if self.table.place(slot, hash) {
            return Ok(Handle(slot));
        }
        // Placement starved; rebuild re-places every entry including the one
        // just stored. Back the store out again if growth ran out of memory.
        if let Err(error) = self.grow() {
            self.entries.remove(slot);
            return Err(error);
        }
        Ok(Handle(slot))
    }

    fn grow(&mut self) -> Result<(), Error> {
        let mut live = Vec::new();
        live.try_reserve_exact(self.entries.len())
            .map_err(|_| Error::OutOfMemory)?;
        live.extend(self.entries.iter().map(|(slot, entry)| (slot, entry.hash)));
        self.table.rebuild(&live)
    }

    /// Returns the handle of the entry for `key`, if present.
    pub fn find<Q>(&self, key: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.locate(key).map(|(_, slot)| Handle(slot))
    }

    /// Returns `true` if the map contains an entry for `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.locate(key).is_some()
    }

    /// Returns a reference to the value for `key`, if present.
    ///
    /// # Examples
    ///
    /// ```
    /// use hopchain::HopMap;
    ///
    /// let mut map = HopMap::new();
    /// map.insert("k".to_string(), 5)?;
    ///
    /// assert_eq!(map.get("k"), Some(&5));
    /// assert_eq!(map.get("missing"), None);
    /// # Ok::<(), hopchain::Error>(())
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let (_, slot) = self.locate(key)?;
        Some(&self.entries[slot].value)
    }

    /// Returns a mutable reference to the value for `key`, if present.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let (_, slot) = self.locate(key)?;
        Some(&mut self.entries[slot].value)
    }

    /// Returns a reference to the value for `key`, or [`Error::NotFound`].
    ///
    /// # Examples
    ///
    /// ```
    /// use hopchain::Error;
    /// use hopchain::HopMap;
    ///
    /// let mut map = HopMap::new();
    /// map.insert(2, 3)?;
    ///
    /// assert_eq!(map.at(&2), Ok(&3));
    /// assert_eq!(map.at(&8), Err(Error::NotFound));
    /// # Ok::<(), hopchain::Error>(())
    /// ```
    pub fn at<Q>(&self, key: &Q) -> Result<&V, Error>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get(key).ok_or(Error::NotFound)
    }

    /// Returns a mutable reference to the value for `key`, inserting
    /// `V::default()` first if the key is absent.
    ///
    /// This is the subscript operator of this map. Like [`insert`]
    /// (which it is built on) it never overwrites an existing value.
    ///
    /// # Examples
    ///
    /// ```
    /// use hopchain::HopMap;
    ///
    /// let mut map: HopMap<&str, i32> = HopMap::new();
    /// *map.get_or_default("hits")? += 1;
    /// *map.get_or_default("hits")? += 1;
    ///
    /// assert_eq!(map.get("hits"), Some(&2));
    /// # Ok::<(), hopchain::Error>(())
    /// ```
    ///
    /// [`insert`]: HopMap::insert
    pub fn get_or_default(&mut self, key: K) -> Result<&mut V, Error>
    where
        V: Default,
    {
        let Handle(slot) = self.insert(key, V::default())?;
        Ok(&mut self.entries[slot].value)
    }

    /// Removes the entry for `key` and returns its value.
    ///
    /// Returns `None` if the key is absent; nothing else changes either way.
    /// Removal never shrinks the table.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove_entry(key).map(|(_, value)| value)
    }

    /// Removes the entry for `key` and returns the stored key and value.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let (index, slot) = self.locate(key)?;
        // Drop the bucket's claim on the handle first, then the entry itself.
        self.table.unlink(index);
        self.entries
            .remove(slot)
            .map(|entry| (entry.key, entry.value))
    }

    /// Removes every entry and resets the table to its initial capacity and
    /// neighborhood.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.table.clear();
        debug_assert_eq!(self.table.capacity(), MIN_NEIGHBORHOOD);
    }

    /// Returns an iterator over the map's key-value pairs.
    ///
    /// The order is the entry store's order; it is unspecified, stable while
    /// the map is not mutated, and restarts from the beginning on every call.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.entries.iter(),
        }
    }

    /// Returns an iterator over the map's pairs with mutable values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.entries.iter_mut(),
        }
    }

    /// Returns an iterator over the map's keys.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Returns an iterator over the map's values.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }
}

impl<K, V, S> fmt::Debug for HopMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in self.entries.values() {
            map.entry(&entry.key, &entry.value);
        }
        map.finish()
    }
}

/// An iterator over the key-value pairs of a [`HopMap`].
pub struct Iter<'a, K, V> {
    inner: slotmap::basic::Iter<'a, DefaultKey, Entry<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(_, entry)| (&entry.key, &entry.value))
    }
}

/// An iterator over the pairs of a [`HopMap`] with mutable values.
pub struct IterMut<'a, K, V> {
    inner: slotmap::basic::IterMut<'a, DefaultKey, Entry<K, V>>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(_, entry)| (&entry.key, &mut entry.value))
    }
}

/// An iterator over the keys of a [`HopMap`].
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }
}

/// An iterator over the values of a [`HopMap`].
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }
}
