// Streamed byte I/O over a cluster chain, growing the chain on demand.

use fatforge_core::{BlockDevice, ForgeError};
use log::trace;

use crate::fat_table::Fat;

/// A sequential reader/writer over the chain starting at `start_cluster`.
///
/// Borrows the device and the FAT for the duration of one streamed
/// operation; nothing is retained across public API boundaries. Growing
/// the chain persists the FAT to every copy before any data byte lands,
/// so a partial failure can leave orphaned clusters but never dangling
/// pointers.
pub struct ClusterChain<'a> {
    device: &'a mut dyn BlockDevice,
    fat: &'a mut Fat,
    start_cluster: u32,
    read_offset: u64,
    write_offset: u64,
}

impl<'a> ClusterChain<'a> {
    pub fn new(device: &'a mut dyn BlockDevice, fat: &'a mut Fat, start_cluster: u32) -> Self {
        Self {
            device,
            fat,
            start_cluster,
            read_offset: 0,
            write_offset: 0,
        }
    }

    pub fn start_cluster(&self) -> u32 {
        self.start_cluster
    }

    /// Write `p` at the current write cursor, extending the chain first
    /// if the bytes would run past its end.
    pub fn write(&mut self, p: &[u8]) -> Result<(), ForgeError> {
        let bpc = self.fat.boot_sector().bytes_per_cluster() as u64;
        let mut chain = self.fat.chain(self.start_cluster)?;
        let chain_bytes = chain.len() as u64 * bpc;

        let end = self.write_offset + p.len() as u64;
        if end > chain_bytes {
            let clusters_needed = ((end - chain_bytes) + bpc - 1) / bpc;
            chain = self
                .fat
                .resize_chain(self.start_cluster, chain.len() + clusters_needed as usize)?;

            // The FAT must reach the device before the data does
            self.fat.write_to_device(self.device)?;
        }

        let mut data_offset = 0usize;
        while data_offset < p.len() {
            let chain_index = (self.write_offset / bpc) as usize;
            let within_cluster = self.write_offset % bpc;
            let device_offset =
                self.fat.boot_sector().cluster_offset(chain[chain_index]) + within_cluster;

            let chunk = (p.len() - data_offset).min((bpc - within_cluster) as usize);
            trace!(
                "writing {} bytes to cluster {} at device offset {}",
                chunk,
                chain[chain_index],
                device_offset
            );

            let written = self
                .device
                .write_at(&p[data_offset..data_offset + chunk], device_offset)?;
            self.write_offset += written as u64;
            data_offset += written;
        }

        Ok(())
    }

    /// Read from the current read cursor into `p`, stopping at the end
    /// of the chain. Returns the number of bytes read; 0 means the
    /// cursor is at or past the end.
    pub fn read(&mut self, p: &mut [u8]) -> Result<usize, ForgeError> {
        let bpc = self.fat.boot_sector().bytes_per_cluster() as u64;
        let chain = self.fat.chain(self.start_cluster)?;
        let chain_bytes = chain.len() as u64 * bpc;

        if self.read_offset >= chain_bytes {
            return Ok(0);
        }

        let wanted = (p.len() as u64).min(chain_bytes - self.read_offset) as usize;
        let mut data_offset = 0usize;
        while data_offset < wanted {
            let chain_index = (self.read_offset / bpc) as usize;
            let within_cluster = self.read_offset % bpc;
            let device_offset =
                self.fat.boot_sector().cluster_offset(chain[chain_index]) + within_cluster;

            let chunk = (wanted - data_offset).min((bpc - within_cluster) as usize);
            trace!(
                "reading {} bytes from cluster {} at device offset {}",
                chunk,
                chain[chain_index],
                device_offset
            );

            let read = self
                .device
                .read_at(&mut p[data_offset..data_offset + chunk], device_offset)?;
            self.read_offset += read as u64;
            data_offset += read;
        }

        Ok(wanted)
    }

    /// Read the entire chain from its beginning.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>, ForgeError> {
        let bpc = self.fat.boot_sector().bytes_per_cluster() as u64;
        let chain = self.fat.chain(self.start_cluster)?;

        self.read_offset = 0;
        let mut data = vec![0u8; (chain.len() as u64 * bpc) as usize];
        self.read(&mut data)?;
        Ok(data)
    }
}
