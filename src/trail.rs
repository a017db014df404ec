//! Lifecycle events noticed while the Region lock is held.
//!
//! A logger is user code and may itself allocate, so nothing is logged under
//! the lock. Events are parked in a fixed size [`Trail`] instead and emitted
//! once the guard is dropped.

/// Upper bound of events a single allocate/free/reallocate can produce.
const CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    RegionCreated { base: usize },
    RegionReleased { base: usize },
    HeapCreated { base: usize, pages: usize },
    HeapDestroyed { base: usize },
    /// A cached `max_linear` promised a fit that the scan could not find.
    Inconsistent(&'static str),
}

#[derive(Debug, Default)]
pub(crate) struct Trail {
    events: [Option<Event>; CAPACITY],
    len: usize,
}

impl Trail {
    pub fn record(&mut self, event: Event) {
        if let Some(slot) = self.events.get_mut(self.len) {
            *slot = Some(event);
            self.len += 1;
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().flatten()
    }

    /// Logs every recorded event. Must be called without the lock held.
    pub fn emit(self) {
        for event in self.events() {
            match *event {
                Event::RegionCreated { base } => log::trace!("region created at {base:#x}"),
                Event::RegionReleased { base } => log::trace!("region at {base:#x} released"),
                Event::HeapCreated { base, pages } => {
                    log::trace!("heap of {pages} pages created at {base:#x}")
                }
                Event::HeapDestroyed { base } => log::trace!("heap at {base:#x} destroyed"),
                Event::Inconsistent(what) => log::warn!("allocator inconsistency: {what}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_events_in_order_and_drops_overflow() {
        let mut trail = Trail::default();

        for base in 0..CAPACITY + 2 {
            trail.record(Event::HeapDestroyed { base });
        }

        let bases: Vec<usize> = trail
            .events()
            .map(|event| match event {
                Event::HeapDestroyed { base } => *base,
                other => panic!("unexpected {other:?}"),
            })
            .collect();

        assert_eq!(bases, (0..CAPACITY).collect::<Vec<_>>());
        trail.emit();
    }
}
