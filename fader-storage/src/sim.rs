//! Simulated flash controller for host testing
//!
//! Models the STM32F0 flash controller closely enough to exercise the NVM
//! layer and the storage engine:
//!
//! - Memory starts erased (0xFF)
//! - A half-word may only be programmed when erased, or overwritten with
//!   0x0000; anything else raises the program error and leaves memory alone
//! - Mutations while the controller is locked are ignored and counted
//! - Per-page write protection and erase counters
//! - Fault injection: power loss after N mutations, a stuck busy flag,
//!   and a corrupted next program

use fader_hal::flash::{ERASED_BYTE, ERASED_HALFWORD};
use fader_hal::{FlashController, FlashStatus};

/// Number of pages tracked for protection and erase counting
pub const MAX_SIM_PAGES: usize = 32;

/// In-RAM flash of `SIZE` bytes with `PAGE`-byte pages, mapped at `base`
#[derive(Debug, Clone)]
pub struct SimFlash<const SIZE: usize, const PAGE: u32 = 1024> {
    base: u32,
    memory: [u8; SIZE],
    locked: bool,
    status: FlashStatus,
    protected: u32,
    erase_counts: [u32; MAX_SIM_PAGES],
    mutations: u32,
    lock_violations: u32,
    power_budget: Option<u32>,
    stuck_busy: bool,
    corrupt_next: bool,
}

impl<const SIZE: usize, const PAGE: u32> SimFlash<SIZE, PAGE> {
    /// Create an erased, locked flash mapped at `base`
    pub fn new(base: u32) -> Self {
        Self {
            base,
            memory: [ERASED_BYTE; SIZE],
            locked: true,
            status: FlashStatus::default(),
            protected: 0,
            erase_counts: [0; MAX_SIM_PAGES],
            mutations: 0,
            lock_violations: 0,
            power_budget: None,
            stuck_busy: false,
            corrupt_next: false,
        }
    }

    /// Raw memory contents
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Raw memory for corruption injection
    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    /// Number of times page `page` has been erased
    pub fn erase_count(&self, page: usize) -> u32 {
        self.erase_counts.get(page).copied().unwrap_or(0)
    }

    /// Number of completed program and erase operations
    pub fn mutations(&self) -> u32 {
        self.mutations
    }

    /// Mutations attempted while the controller was locked
    pub fn lock_violations(&self) -> u32 {
        self.lock_violations
    }

    /// Write-protect page `page`
    pub fn protect_page(&mut self, page: usize) {
        if page < MAX_SIM_PAGES {
            self.protected |= 1 << page;
        }
    }

    /// Let `remaining` more mutations through, then drop every later one
    ///
    /// Dropped operations leave memory untouched and report a program
    /// error, as if the supply collapsed before the cells were changed.
    pub fn power_fail_after(&mut self, remaining: u32) {
        self.power_budget = Some(remaining);
    }

    /// Stop dropping mutations
    pub fn restore_power(&mut self) {
        self.power_budget = None;
    }

    /// Make the busy flag stick
    pub fn set_stuck_busy(&mut self, stuck: bool) {
        self.stuck_busy = stuck;
    }

    /// Flip a bit in the next programmed half-word
    pub fn corrupt_next_program(&mut self) {
        self.corrupt_next = true;
    }

    fn offset_of(&self, address: u32) -> Option<usize> {
        let offset = address.checked_sub(self.base)? as usize;
        (offset < SIZE).then_some(offset)
    }

    fn is_protected(&self, offset: usize) -> bool {
        let page = offset / PAGE as usize;
        page < MAX_SIM_PAGES && self.protected & (1 << page) != 0
    }

    /// Consume one unit of power budget; false when the operation is lost
    fn draw_power(&mut self) -> bool {
        match self.power_budget {
            Some(0) => false,
            Some(n) => {
                self.power_budget = Some(n - 1);
                true
            }
            None => true,
        }
    }

    fn fail(&mut self) {
        self.status = FlashStatus {
            program_error: true,
            ..FlashStatus::default()
        };
    }
}

impl<const SIZE: usize, const PAGE: u32> FlashController for SimFlash<SIZE, PAGE> {
    const PAGE_SIZE: u32 = PAGE;

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn unlock(&mut self) {
        self.locked = false;
    }

    fn lock(&mut self) {
        self.locked = true;
    }

    fn start_program(&mut self, address: u32, halfword: u16) {
        if self.locked {
            self.lock_violations += 1;
            return;
        }
        let Some(offset) = self.offset_of(address).filter(|o| o + 1 < SIZE) else {
            self.fail();
            return;
        };
        if self.is_protected(offset) {
            self.status = FlashStatus {
                write_protect_error: true,
                ..FlashStatus::default()
            };
            return;
        }
        if !self.draw_power() {
            self.fail();
            return;
        }

        let current = u16::from_le_bytes([self.memory[offset], self.memory[offset + 1]]);
        if current != ERASED_HALFWORD && halfword != 0x0000 {
            self.fail();
            return;
        }

        let mut value = current & halfword;
        if self.corrupt_next {
            self.corrupt_next = false;
            value ^= 0x0001;
        }
        self.memory[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        self.mutations += 1;
        self.status = FlashStatus {
            end_of_operation: true,
            ..FlashStatus::default()
        };
    }

    fn start_page_erase(&mut self, address: u32) {
        if self.locked {
            self.lock_violations += 1;
            return;
        }
        let Some(offset) = self.offset_of(address) else {
            self.fail();
            return;
        };
        if self.is_protected(offset) {
            self.status = FlashStatus {
                write_protect_error: true,
                ..FlashStatus::default()
            };
            return;
        }
        if !self.draw_power() {
            self.fail();
            return;
        }

        let page = offset / PAGE as usize;
        let start = page * PAGE as usize;
        let end = (start + PAGE as usize).min(SIZE);
        self.memory[start..end].fill(ERASED_BYTE);
        if page < MAX_SIM_PAGES {
            self.erase_counts[page] += 1;
        }
        self.mutations += 1;
        self.status = FlashStatus {
            end_of_operation: true,
            ..FlashStatus::default()
        };
    }

    fn status(&self) -> FlashStatus {
        if self.stuck_busy {
            FlashStatus {
                busy: true,
                ..self.status
            }
        } else {
            self.status
        }
    }

    fn clear_status(&mut self) {
        self.status = FlashStatus::default();
    }

    fn finish(&mut self) {}

    fn read(&self, address: u32, buf: &mut [u8]) {
        match self.offset_of(address) {
            Some(offset) if offset + buf.len() <= SIZE => {
                buf.copy_from_slice(&self.memory[offset..offset + buf.len()]);
            }
            _ => buf.fill(ERASED_BYTE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_erased_and_locked() {
        let sim = SimFlash::<256, 128>::new(0x1000);
        assert!(sim.is_locked());
        assert!(sim.memory().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_locked_program_ignored() {
        let mut sim = SimFlash::<256, 128>::new(0x1000);
        sim.start_program(0x1000, 0x1234);
        assert_eq!(sim.lock_violations(), 1);
        assert_eq!(sim.memory()[0], 0xFF);
        assert!(!sim.status().end_of_operation);
    }

    #[test]
    fn test_power_budget() {
        let mut sim = SimFlash::<256, 128>::new(0);
        sim.unlock();
        sim.power_fail_after(1);
        sim.start_program(0, 0x1111);
        assert!(sim.status().end_of_operation);
        sim.start_program(2, 0x2222);
        assert!(sim.status().program_error);
        assert_eq!(&sim.memory()[2..4], &[0xFF, 0xFF]);

        sim.restore_power();
        sim.start_program(2, 0x2222);
        assert!(sim.status().end_of_operation);
    }
}
