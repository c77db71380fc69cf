//! User-facing surface of one disk.

use std::cell::RefCell;
use std::rc::Rc;

use platsim_core::Id;

use crate::model::{DiskId, DiskModel};
use crate::storage::{Storage, StorageInfo};

/// Represents one disk backed by a [`DiskModel`].
pub struct Disk {
    model: Rc<RefCell<DiskModel>>,
    disk: DiskId,
}

impl Disk {
    /// Creates the disk surface for a sealed disk.
    pub fn new(model: Rc<RefCell<DiskModel>>, disk: DiskId) -> Self {
        Self { model, disk }
    }

    /// Cancels an operation by its request id.
    pub fn cancel(&mut self, request_id: u64) {
        self.model.borrow_mut().cancel(request_id);
    }
}

/// Storage model implementation for disk.
impl Storage for Disk {
    fn read(&mut self, size: u64, requester: Id) -> u64 {
        self.model.borrow_mut().read(self.disk, size, requester)
    }

    fn write(&mut self, size: u64, requester: Id) -> u64 {
        self.model.borrow_mut().write(self.disk, size, requester)
    }

    fn mark_free(&mut self, size: u64) -> Result<(), String> {
        self.model.borrow_mut().mark_free(self.disk, size)
    }

    fn used_space(&self) -> u64 {
        self.model.borrow().used_space(self.disk)
    }

    fn free_space(&self) -> u64 {
        self.model.borrow().free_space(self.disk)
    }

    fn capacity(&self) -> u64 {
        self.model.borrow().capacity(self.disk)
    }

    fn info(&self) -> StorageInfo {
        StorageInfo {
            capacity: self.capacity(),
            used_space: self.used_space(),
            free_space: self.free_space(),
        }
    }
}
