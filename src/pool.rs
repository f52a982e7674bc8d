//! Fixed-capacity slot table for connections that are still sending their
//! request.

use std::io::{self, Read};

/// One connection and the bytes it has sent so far.
pub struct Slot<S> {
    conn: Option<S>,
    buffer: Vec<u8>,
    filled: usize,
}

impl<S> Slot<S> {
    fn empty() -> Self {
        Self {
            conn: None,
            buffer: Vec::new(),
            filled: 0,
        }
    }

    /// The accumulated request bytes.
    pub fn filled(&self) -> &[u8] {
        &self.buffer[..self.filled]
    }

    /// Size of the request buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

impl<S: Read> Slot<S> {
    /// One read appended at the current fill offset.
    ///
    /// `Ok(0)` always means the peer shut down: reading with no room left is
    /// an error instead.
    pub fn fill(&mut self) -> io::Result<usize> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "slot is free"))?;

        let spare = &mut self.buffer[self.filled..];
        if spare.is_empty() {
            return Err(io::Error::new(io::ErrorKind::OutOfMemory, "request buffer is full"));
        }

        let n = conn.read(spare)?;
        self.filled += n;
        Ok(n)
    }
}

/// An arena of slots with an explicit free-list.
///
/// Admission and removal are O(1); memory is bounded by
/// `max_connections * buffer_capacity`. Slot buffers are allocated on first
/// use and reused after the slot is freed.
pub struct Pool<S> {
    slots: Vec<Slot<S>>,
    free: Vec<usize>,
    buffer_capacity: usize,
    high_water: Option<usize>,
}

impl<S> Pool<S> {
    pub fn new(max_connections: usize, buffer_capacity: usize) -> Self {
        Self {
            slots: (0..max_connections).map(|_| Slot::empty()).collect(),
            // popped from the back, so the lowest index goes first
            free: (0..max_connections).rev().collect(),
            buffer_capacity,
            high_water: None,
        }
    }

    /// Places `conn` in a free slot and returns its index, or hands the
    /// connection back when every slot is taken.
    pub fn insert(&mut self, conn: S) -> Result<usize, S> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => return Err(conn),
        };

        let slot = &mut self.slots[index];
        if slot.buffer.len() != self.buffer_capacity {
            slot.buffer = vec![0; self.buffer_capacity];
        }
        slot.filled = 0;
        slot.conn = Some(conn);

        self.high_water = Some(self.high_water.map_or(index, |high| high.max(index)));
        Ok(index)
    }

    /// Frees slot `index` and returns its connection.
    pub fn remove(&mut self, index: usize) -> Option<S> {
        let slot = self.slots.get_mut(index)?;
        let conn = slot.conn.take()?;
        slot.filled = 0;
        self.free.push(index);
        Some(conn)
    }

    /// The occupied slot at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Slot<S>> {
        self.slots.get_mut(index).filter(|slot| slot.conn.is_some())
    }

    pub fn get(&self, index: usize) -> Option<&Slot<S>> {
        self.slots.get(index).filter(|slot| slot.conn.is_some())
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Highest slot index occupied since the pool was created.
    pub fn high_water(&self) -> Option<usize> {
        self.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_insert_uses_lowest_free_slot() {
        let mut pool: Pool<Cursor<Vec<u8>>> = Pool::new(3, 8);
        assert_eq!(pool.insert(Cursor::new(vec![])).ok(), Some(0));
        assert_eq!(pool.insert(Cursor::new(vec![])).ok(), Some(1));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.high_water(), Some(1));
    }

    /// A full pool hands the connection back untouched.
    #[test]
    fn test_full_pool_returns_connection() {
        let mut pool = Pool::new(1, 8);
        pool.insert(Cursor::new(b"a".to_vec())).ok().unwrap();

        let rejected = pool.insert(Cursor::new(b"b".to_vec())).unwrap_err();
        assert_eq!(rejected.into_inner(), b"b");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_recycles_slot() {
        let mut pool: Pool<Cursor<Vec<u8>>> = Pool::new(2, 8);
        let a = pool.insert(Cursor::new(vec![])).ok().unwrap();
        let b = pool.insert(Cursor::new(vec![])).ok().unwrap();

        assert!(pool.remove(a).is_some());
        assert!(pool.remove(a).is_none());
        assert!(pool.get(a).is_none());
        assert_eq!(pool.insert(Cursor::new(vec![])).ok(), Some(a));
        assert_eq!(pool.high_water(), Some(b));
        assert!(pool.get_mut(b).is_some());
    }

    /// Successive reads append at the fill offset.
    #[test]
    fn test_fill_accumulates() {
        let mut pool = Pool::new(1, 64);
        let index = pool.insert(Cursor::new(b"GET /\r\n\r\n".to_vec())).ok().unwrap();
        let slot = pool.get_mut(index).unwrap();

        let mut total = 0;
        loop {
            match slot.fill().unwrap() {
                0 => break,
                n => total += n,
            }
        }
        assert_eq!(total, 9);
        assert_eq!(slot.filled(), b"GET /\r\n\r\n");
    }

    /// Bytes beyond the capacity are never read.
    #[test]
    fn test_fill_stops_at_capacity() {
        let mut pool = Pool::new(1, 4);
        let index = pool.insert(Cursor::new(b"abcdefgh".to_vec())).ok().unwrap();
        let slot = pool.get_mut(index).unwrap();

        assert_eq!(slot.fill().unwrap(), 4);
        assert_eq!(slot.filled(), b"abcd");
        assert_eq!(slot.fill().unwrap_err().kind(), io::ErrorKind::OutOfMemory);
    }

    /// A recycled slot starts empty.
    #[test]
    fn test_reused_slot_is_reset() {
        let mut pool = Pool::new(1, 8);
        let index = pool.insert(Cursor::new(b"old".to_vec())).ok().unwrap();
        pool.get_mut(index).unwrap().fill().unwrap();
        pool.remove(index);

        let index = pool.insert(Cursor::new(b"new".to_vec())).ok().unwrap();
        let slot = pool.get_mut(index).unwrap();
        assert!(slot.filled().is_empty());
        slot.fill().unwrap();
        assert_eq!(slot.filled(), b"new");
    }
}
