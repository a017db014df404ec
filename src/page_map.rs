//! Page-Run Table.
//!
//! One `u32` entry per page of a Region. Pages are grouped in runs: maximal
//! ranges of pages that are either all free or all part of the same
//! allocation. Only the first (head) and last (tail) entry of a run are
//! meaningful; both hold the run length, plus [`PAGE_FREE`] when the run is
//! free. Interior entries are stale leftovers and are never read.
//!
//! ```text
//!  index:  0     1     2     3     4     5     6     7
//!        +-----+-----+-----+-----+-----+-----+-----+-----+
//!        | F|3 |  ?  | F|3 |  2  |  2  | F|3 |  ?  | F|3 |
//!        +-----+-----+-----+-----+-----+-----+-----+-----+
//!         \___ free ___/ \__used_/ \___ free ___/
//! ```
//!
//! Keeping the tail in sync with the head is what makes merging O(1): the
//! run before `start` is described by entry `start - 1`, the run after
//! `start + pages` by entry `start + pages`.

/// Bit flagging a run as free.
pub(crate) const PAGE_FREE: u32 = 1 << 31;

/// A run of pages as recorded by its head entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Run {
    pub start: usize,
    pub pages: usize,
    pub free: bool,
}

/// View over the page entries of one Region.
pub(crate) struct PageRuns<'a> {
    map: &'a mut [u32],
}

impl<'a> PageRuns<'a> {
    pub fn new(map: &'a mut [u32]) -> Self {
        debug_assert!(map.len() < PAGE_FREE as usize);
        Self { map }
    }

    /// Total number of pages tracked.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Marks every page as part of a single free run.
    pub fn reset(&mut self) {
        let len = self.len();
        self.mark(0, len, true);
    }

    /// Decodes the head (or tail) entry at `index`.
    #[inline]
    pub fn run_at(&self, index: usize) -> Run {
        let entry = self.map[index];

        Run {
            start: index,
            pages: (entry & !PAGE_FREE) as usize,
            free: entry & PAGE_FREE != 0,
        }
    }

    /// Walks every run from the first page to the last.
    pub fn runs(&self) -> impl Iterator<Item = Run> + '_ {
        let mut walk = 0;

        std::iter::from_fn(move || {
            if walk >= self.len() {
                return None;
            }
            let run = self.run_at(walk);
            // A zero length run would loop forever, the table is corrupt.
            if run.pages == 0 {
                return None;
            }
            walk += run.pages;

            Some(run)
        })
    }

    /// Writes matching head and tail entries for `[start, start + pages)`.
    fn mark(&mut self, start: usize, pages: usize, free: bool) {
        debug_assert!(pages > 0 && start + pages <= self.len());

        let entry = pages as u32 | if free { PAGE_FREE } else { 0 };
        self.map[start] = entry;
        self.map[start + pages - 1] = entry;
    }

    /// Largest free run starting the walk at page `from`, never smaller than `seed`.
    pub fn largest_free(&self, from: usize, seed: usize) -> usize {
        let mut walk = from;
        let mut largest = seed;

        while walk < self.len() {
            let run = self.run_at(walk);
            if run.pages == 0 {
                break;
            }
            if run.free && run.pages > largest {
                largest = run.pages;
            }
            walk += run.pages;
        }

        largest
    }

    /// First-fit search for `pages` contiguous free pages.
    ///
    /// `max_linear` is the caller's cached largest free run. The table is only
    /// scanned when the cache says a fit is possible, and the cache is
    /// recomputed whenever the consumed run was the largest one.
    ///
    /// The allocation is taken from the end of the matched run so the
    /// leftover keeps the run's head entry.
    ///
    /// Returns the index of the first allocated page.
    pub fn take(&mut self, pages: usize, max_linear: &mut usize) -> Option<usize> {
        if pages == 0 || *max_linear < pages {
            return None;
        }

        let mut walk = 0;
        // Largest free run seen before the match.
        let mut seen = 0;

        while walk < self.len() {
            let run = self.run_at(walk);
            if run.pages == 0 {
                break;
            }

            if run.free {
                if run.pages >= pages {
                    let extra = run.pages - pages;
                    if extra > 0 {
                        self.mark(walk, extra, true);
                        seen = seen.max(extra);
                        walk += extra;
                    }
                    self.mark(walk, pages, false);

                    if run.pages == *max_linear {
                        *max_linear = self.largest_free(walk + pages, seen);
                    }

                    return Some(walk);
                }
                seen = seen.max(run.pages);
            }
            walk += run.pages;
        }

        None
    }

    /// Frees the used run `[start, start + pages)`, merging it with free
    /// neighbours. Returns the resulting free run.
    pub fn release(&mut self, start: usize, pages: usize) -> Run {
        let mut new_start = start;
        let mut new_pages = pages;

        // Previous run, through its tail entry.
        if start > 0 {
            let prev = self.run_at(start - 1);
            if prev.free {
                new_start -= prev.pages;
                new_pages += prev.pages;
            }
        }

        // Following run, through its head entry.
        let end = start + pages;
        if end < self.len() {
            let next = self.run_at(end);
            if next.free {
                new_pages += next.pages;
            }
        }

        self.mark(new_start, new_pages, true);

        Run {
            start: new_start,
            pages: new_pages,
            free: true,
        }
    }

    /// Shrinks the used run at `start` from `old_pages` to `new_pages`,
    /// releasing the tail. Returns the free run the tail ended up in.
    pub fn shrink(&mut self, start: usize, old_pages: usize, new_pages: usize) -> Run {
        debug_assert!(new_pages > 0 && new_pages < old_pages);

        self.mark(start, new_pages, false);
        self.release(start + new_pages, old_pages - new_pages)
    }
}
