//! Timing control implementation
//!
//! The master clock is the time base of the whole machine. The CPU advances
//! it through its bus accesses and internal operations, the audio unit is
//! derived from it (see [`crate::smp::Smp::catch_up`]) and callers drive the
//! machine through events scheduled at absolute master cycles.
//!
//! # Literature
//!
//! - <https://wiki.superfamicom.org/timing>

use crate::{
    backend::AudioBackend,
    cpu::CpuState,
    device::{Device, MemoryMap},
};
use std::{cmp::Ordering, collections::BinaryHeap};

pub type Cycles = u32;

// > Internal operation CPU cycles always take 6 master cycles
// source: <https://wiki.superfamicom.org/memory-mapping>
pub const ONE_CYCLE: Cycles = 6;
pub const SLOW_ONE_CYCLE: Cycles = 8;
pub const EXTRA_SLOW_ONE_CYCLE: Cycles = 12;
pub const TWO_CYCLES: Cycles = ONE_CYCLE * 2;

/// The APU runs at 1.024 MHz
pub const APU_CLOCK_HZ: u32 = 1_024_000;

/// Something that happens at a fixed master cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Latch an NMI edge
    Nmi,
    /// Raise the IRQ line
    IrqAssert,
    /// Lower the IRQ line
    IrqRelease,
    /// Only stops the run loop
    Deadline,
    /// A caller-defined marker without any effect on the machine
    Tag(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Scheduled {
    at: u64,
    seq: u64,
    event: Event,
}

impl Ord for Scheduled {
    // `BinaryHeap` is a max-heap; the earliest (and first scheduled) event
    // must compare greatest
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The master clock and the queue of pending events
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    /// Master cycles since reset
    pub cycles: u64,
    queue: BinaryHeap<Scheduled>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.cycles = 0;
        self.queue.clear();
        self.seq = 0;
    }

    pub fn schedule(&mut self, at: u64, event: Event) {
        self.seq += 1;
        self.queue.push(Scheduled {
            at,
            seq: self.seq,
            event,
        })
    }

    /// Time of the earliest pending event
    pub fn next_time(&self) -> Option<u64> {
        self.queue.peek().map(|s| s.at)
    }

    /// Remove the earliest event if it is due
    fn pop_due(&mut self) -> Option<Event> {
        if self.next_time()? <= self.cycles {
            self.queue.pop().map(|s| s.event)
        } else {
            None
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl<M: MemoryMap, B: AudioBackend> Device<M, B> {
    /// Schedule an event at an absolute master cycle. Events in the past
    /// fire before the next instruction.
    pub fn schedule(&mut self, at: u64, event: Event) {
        self.scheduler.schedule(at, event)
    }

    /// Schedule an event relative to the current master cycle
    pub fn schedule_in(&mut self, delta: u64, event: Event) {
        self.scheduler.schedule(self.scheduler.cycles + delta, event)
    }

    fn apply_event(&mut self, event: Event) {
        match event {
            Event::Nmi => self.post_nmi(),
            Event::IrqAssert => self.set_irq_line(true),
            Event::IrqRelease => self.set_irq_line(false),
            Event::Deadline | Event::Tag(_) => (),
        }
    }

    /// Execute one instruction, or enter one pending interrupt handler.
    ///
    /// Returns the master cycles this took; `0` if the CPU is not running.
    pub fn step(&mut self) -> Cycles {
        let start = self.scheduler.cycles;
        if !self.poll_interrupts() && self.cpu.state == CpuState::Running {
            self.dispatch_instruction();
        }
        (self.scheduler.cycles - start) as Cycles
    }

    /// Run the CPU until the master clock reaches `limit`. A halted CPU
    /// skips the remaining time. Returns `false` on a debug break.
    fn run_to(&mut self, limit: u64) -> bool {
        while self.scheduler.cycles < limit {
            match self.cpu.state {
                CpuState::Running => {
                    self.step();
                }
                CpuState::WaitingForInterrupt if self.cpu.nmi_pending || self.cpu.irq_line => {
                    self.step();
                }
                CpuState::WaitingForInterrupt | CpuState::Stopped => {
                    self.scheduler.cycles = limit
                }
                CpuState::DebugBreak => return false,
            }
        }
        true
    }

    /// Run until the earliest scheduled event, apply it and return it.
    ///
    /// Returns `None` if no event is scheduled or if the CPU entered
    /// [`CpuState::DebugBreak`] first. The audio unit is caught up in
    /// either case.
    pub fn run_until_event(&mut self) -> Option<Event> {
        let event = match self.scheduler.next_time() {
            Some(at) if self.run_to(at) => self.scheduler.pop_due(),
            _ => None,
        };
        if let Some(event) = event {
            self.apply_event(event)
        }
        self.sync_apu();
        event
    }

    /// Run for the given number of master cycles, applying every event
    /// that falls into the slice. Stops early on a debug break.
    pub fn run_for(&mut self, cycles: u64) {
        let target = self.scheduler.cycles + cycles;
        loop {
            while let Some(event) = self.scheduler.pop_due() {
                self.apply_event(event)
            }
            if self.scheduler.cycles >= target {
                break;
            }
            let limit = self
                .scheduler
                .next_time()
                .map_or(target, |at| at.min(target));
            if !self.run_to(limit) {
                break;
            }
        }
        self.sync_apu();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_pop_in_time_then_insertion_order() {
        let mut s = Scheduler::new();
        s.schedule(30, Event::Tag(3));
        s.schedule(10, Event::Tag(1));
        s.schedule(10, Event::Tag(2));
        assert_eq!(s.next_time(), Some(10));
        assert_eq!(s.pop_due(), None);
        s.cycles = 10;
        assert_eq!(s.pop_due(), Some(Event::Tag(1)));
        assert_eq!(s.pop_due(), Some(Event::Tag(2)));
        assert_eq!(s.pop_due(), None);
        s.cycles = 100;
        assert_eq!(s.pop_due(), Some(Event::Tag(3)));
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn reset_clears_queue() {
        let mut s = Scheduler::new();
        s.schedule(5, Event::Nmi);
        s.cycles = 77;
        s.reset();
        assert_eq!((s.cycles, s.pending()), (0, 0));
    }
}
