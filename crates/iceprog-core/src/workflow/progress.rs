//! Progress callbacks

/// Callback for progress reporting during a workflow run
pub trait Progress {
    /// Called before the first sector is erased
    fn erasing(&mut self, sectors: usize, bytes: usize);

    /// Called after each sector is erased
    fn erase_progress(&mut self, sectors_erased: usize);

    /// Called before programming starts
    fn programming(&mut self, total_bytes: usize);

    /// Called after each page is programmed
    fn program_progress(&mut self, bytes_written: usize);

    /// Called before reading back or comparing
    fn reading(&mut self, total_bytes: usize);

    /// Called after each chunk is read
    fn read_progress(&mut self, bytes_read: usize);

    /// Called when the current phase ends
    fn finish(&mut self);
}

/// A no-op progress reporter
pub struct NoProgress;

impl Progress for NoProgress {
    fn erasing(&mut self, _sectors: usize, _bytes: usize) {}
    fn erase_progress(&mut self, _sectors_erased: usize) {}
    fn programming(&mut self, _total_bytes: usize) {}
    fn program_progress(&mut self, _bytes_written: usize) {}
    fn reading(&mut self, _total_bytes: usize) {}
    fn read_progress(&mut self, _bytes_read: usize) {}
    fn finish(&mut self) {}
}

impl<P: Progress + ?Sized> Progress for &mut P {
    fn erasing(&mut self, sectors: usize, bytes: usize) {
        (**self).erasing(sectors, bytes)
    }

    fn erase_progress(&mut self, sectors_erased: usize) {
        (**self).erase_progress(sectors_erased)
    }

    fn programming(&mut self, total_bytes: usize) {
        (**self).programming(total_bytes)
    }

    fn program_progress(&mut self, bytes_written: usize) {
        (**self).program_progress(bytes_written)
    }

    fn reading(&mut self, total_bytes: usize) {
        (**self).reading(total_bytes)
    }

    fn read_progress(&mut self, bytes_read: usize) {
        (**self).read_progress(bytes_read)
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}
