use crate::halt::halt;
use crate::{Frame, FrameNumber, FrameTable};

/// Returns the descriptor of a frame that sits on a free list.
///
/// # Panics
///
/// Panics if the frame is not managed, which means a list was corrupted.
fn descriptor(table: &FrameTable, frame: FrameNumber) -> &Frame {
    table
        .descriptor(frame)
        .unwrap_or_else(|| halt(format_args!("free list links unmanaged frame {frame}")))
}

/// A LIFO list of free frames, linked through the frame table.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    head: Option<FrameNumber>,
    len: usize,
}

impl FreeList {
    /// Creates an empty list.
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Returns the number of frames on the list.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Pushes a frame onto the front of the list.
    pub(crate) fn push(&mut self, table: &FrameTable, frame: FrameNumber) {
        descriptor(table, frame).set_next_free(self.head);
        self.head = Some(frame);
        self.len += 1;
    }

    /// Pops the frame at the front of the list.
    pub(crate) fn pop(&mut self, table: &FrameTable) -> Option<FrameNumber> {
        let frame = self.head?;
        let entry = descriptor(table, frame);
        self.head = entry.next_free();
        entry.set_next_free(None);
        self.len -= 1;
        Some(frame)
    }

    /// Detaches the front half of the list.
    ///
    /// A slow cursor advances one frame for every two the fast cursor advances, so
    /// when the fast cursor falls off the end the slow one marks the last frame of the
    /// front half. For a list of `n` frames the detached chain holds `ceil(n / 2)` of
    /// them and `floor(n / 2)` stay behind.
    pub(crate) fn split_front_half(&mut self, table: &FrameTable) -> Option<Chain> {
        let head = self.head?;
        let mut slow = head;
        let mut taken = 1;
        let mut fast = descriptor(table, head).next_free();

        while let Some(step) = fast {
            fast = descriptor(table, step).next_free();
            let Some(step) = fast else { break };
            slow = descriptor(table, slow)
                .next_free()
                .unwrap_or_else(|| halt(format_args!("free list ended behind its fast cursor")));
            taken += 1;
            fast = descriptor(table, step).next_free();
        }

        let tail = descriptor(table, slow);
        self.head = tail.next_free();
        tail.set_next_free(None);
        self.len -= taken;

        Some(Chain {
            head,
            tail: slow,
            len: taken,
        })
    }

    /// Puts a detached chain in front of this list.
    pub(crate) fn splice(&mut self, table: &FrameTable, chain: Chain) {
        descriptor(table, chain.tail).set_next_free(self.head);
        self.head = Some(chain.head);
        self.len += chain.len;
    }
}

/// A non-empty run of frames detached from a [`FreeList`].
#[derive(Debug)]
pub(crate) struct Chain {
    head: FrameNumber,
    tail: FrameNumber,
    len: usize,
}

impl Chain {
    /// Returns the number of frames in the chain.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Splits off the first frame, returning it with whatever remains.
    pub(crate) fn take_first(self, table: &FrameTable) -> (FrameNumber, Option<Chain>) {
        let entry = descriptor(table, self.head);
        let rest = entry.next_free().map(|head| Chain {
            head,
            tail: self.tail,
            len: self.len - 1,
        });
        entry.set_next_free(None);
        (self.head, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PhysicalAddress;

    fn table(frames: usize) -> FrameTable {
        FrameTable::new(PhysicalAddress::new(0), PhysicalAddress::new(frames * crate::PAGE_SIZE))
    }

    fn list_of(table: &FrameTable, frames: impl Iterator<Item = usize>) -> FreeList {
        let mut list = FreeList::new();
        for frame in frames {
            list.push(table, FrameNumber::new(frame));
        }
        list
    }

    fn drain(table: &FrameTable, list: &mut FreeList) -> Vec<usize> {
        core::iter::from_fn(|| list.pop(table)).map(FrameNumber::as_usize).collect()
    }

    #[test]
    fn push_pop_is_lifo() {
        let table = table(4);
        let mut list = list_of(&table, 0..3);
        assert_eq!(list.len(), 3);
        assert_eq!(drain(&table, &mut list), [2, 1, 0]);
        assert_eq!(list.len(), 0);
        assert_eq!(list.pop(&table), None);
    }

    #[test]
    fn split_takes_the_front_half() {
        for n in 1..=9 {
            let table = table(16);
            let mut list = list_of(&table, 0..n);
            let chain = list.split_front_half(&table).unwrap();

            assert_eq!(chain.len(), n.div_ceil(2), "stolen half of {n}");
            assert_eq!(list.len(), n / 2, "remainder of {n}");

            let mut stolen = FreeList::new();
            stolen.splice(&table, chain);
            let mut all = drain(&table, &mut stolen);
            assert_eq!(all, (n / 2..n).rev().collect::<Vec<_>>());
            all.extend(drain(&table, &mut list));
            all.sort_unstable();
            assert_eq!(all, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn split_of_empty_list_is_none() {
        let table = table(1);
        assert!(FreeList::new().split_front_half(&table).is_none());
    }

    #[test]
    fn splice_goes_in_front() {
        let table = table(8);
        let mut victim = list_of(&table, 0..4);
        let mut thief = list_of(&table, 4..6);
        let chain = victim.split_front_half(&table).unwrap();
        thief.splice(&table, chain);

        assert_eq!(thief.len(), 4);
        assert_eq!(drain(&table, &mut thief), [3, 2, 5, 4]);
    }

    #[test]
    fn take_first_leaves_the_rest() {
        let table = table(4);
        let mut list = list_of(&table, 0..4);
        let chain = list.split_front_half(&table).unwrap();

        let (first, rest) = chain.take_first(&table);
        assert_eq!(first, FrameNumber::new(3));
        let rest = rest.unwrap();
        assert_eq!(rest.len(), 1);
        let (second, rest) = rest.take_first(&table);
        assert_eq!(second, FrameNumber::new(2));
        assert!(rest.is_none());
    }
}
