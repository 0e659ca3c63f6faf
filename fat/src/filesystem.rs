// Opening an existing volume and reaching its root directory.

use fatforge_core::{BlockDevice, ForgeError};
use log::info;

use crate::boot_sector::{BootSector, FatType};
use crate::directory::Directory;
use crate::directory_cluster::DirectoryCluster;
use crate::fat_table::Fat;

/// A decoded FAT volume: the boot sector and the allocation table.
///
/// No device handle is retained; every operation borrows the device for
/// the duration of the call.
pub struct FileSystem {
    boot_sector: BootSector,
    pub(crate) fat: Fat,
}

impl FileSystem {
    /// Decode the boot sector and the first FAT copy of a volume.
    pub fn open(device: &mut dyn BlockDevice) -> Result<Self, ForgeError> {
        let boot_sector = BootSector::decode(device)?;
        let bs = boot_sector.common();
        let fat = Fat::decode(device, bs, 0)?;

        info!(
            "opened {} volume: {} sectors, {} bytes/cluster, {} clusters",
            fat.fat_type().label(),
            bs.total_sectors,
            bs.bytes_per_cluster(),
            bs.cluster_count()
        );

        Ok(Self { boot_sector, fat })
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.boot_sector
    }

    pub fn fat(&self) -> &Fat {
        &self.fat
    }

    pub fn fat_type(&self) -> FatType {
        self.fat.fat_type()
    }

    /// The root directory: the fixed region on FAT12/16, the root
    /// cluster chain on FAT32.
    pub fn root_dir(
        &mut self,
        device: &mut dyn BlockDevice,
    ) -> Result<Directory<'_>, ForgeError> {
        let cluster = match &self.boot_sector {
            BootSector::Fat16(bs) => DirectoryCluster::decode_fat16_root(device, &bs.common)?,
            BootSector::Fat32(bs) => {
                DirectoryCluster::decode_chain(device, &mut self.fat, bs.root_cluster)?
                    .mark_root()
            }
        };

        Ok(Directory::new(self, cluster))
    }
}
