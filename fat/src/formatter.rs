// "Super floppy" formatting: the whole device becomes a single FAT
// volume with no partition table. Geometry is decided here; the boot
// sector codec does the byte work.

use std::time::{SystemTime, UNIX_EPOCH};

use fatforge_core::{BlockDevice, ForgeError};
use log::info;
use serde::{Deserialize, Serialize};

use crate::boot_sector::{BootSector, BootSectorCommon, BootSectorFat16, BootSectorFat32, FatType};
use crate::constants::*;
use crate::fat_table::Fat;

pub const DEFAULT_LABEL: &str = "NONAME";
pub const DEFAULT_OEM_NAME: &str = "FATFORGE";

/// Configuration for formatting a device. Once used to format, the
/// options must not be reinterpreted against the same volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperFloppyOptions {
    /// The FAT variant to lay out. The device must be a plausible size
    /// for it.
    pub fat_type: FatType,

    /// Volume label; defaults to "NONAME".
    pub label: Option<String>,

    /// OEM name in the boot sector; defaults to a fixed tag.
    pub oem_name: Option<String>,

    /// Pin the volume ID instead of deriving it from the clock, which
    /// makes the produced image reproducible.
    pub volume_id: Option<u32>,
}

impl SuperFloppyOptions {
    pub fn new(fat_type: FatType) -> Self {
        Self {
            fat_type,
            label: None,
            oem_name: None,
            volume_id: None,
        }
    }
}

/// Write the boot sector of a new super-floppy volume. Nothing else is
/// touched: on a factory-fresh (all zero) device the FAT and root
/// directory regions are already in their formatted state, otherwise
/// zeroing them is the caller's responsibility — or use
/// [`format_volume`].
pub fn format_super_floppy(
    device: &mut dyn BlockDevice,
    options: &SuperFloppyOptions,
) -> Result<BootSector, ForgeError> {
    let boot_sector = build_boot_sector(device, options)?;
    boot_sector.write_to_device(device)?;
    Ok(boot_sector)
}

/// Fully initialize a volume: boot sector, FSInfo and backup sectors on
/// FAT32, a fresh FAT mirrored to every copy, and a zeroed root
/// directory region. The result mounts under independent FAT
/// implementations.
pub fn format_volume(
    device: &mut dyn BlockDevice,
    options: &SuperFloppyOptions,
) -> Result<BootSector, ForgeError> {
    let boot_sector = format_super_floppy(device, options)?;
    let bs = boot_sector.common();
    let bps = bs.bytes_per_sector as u64;

    let mut fat = Fat::new(bs)?;

    if let BootSector::Fat32(fat32) = &boot_sector {
        // The root directory occupies its own chain from the start
        fat.set_entry(fat32.root_cluster, fat.end_of_chain_value());

        let fs_info = build_fs_info_sector(bs.cluster_count() - 1, fat32.root_cluster + 1);
        device.write_at(&fs_info, fat32.fs_info_sector as u64 * bps)?;

        let backup_offset = fat32.backup_boot_sector as u64 * bps;
        device.write_at(&boot_sector.encode()?, backup_offset)?;
        device.write_at(&fs_info, backup_offset + bps)?;
    }

    fat.write_to_device(device)?;

    match &boot_sector {
        BootSector::Fat16(_) => {
            let zeros = vec![0u8; bs.root_dir_bytes() as usize];
            device.write_at(&zeros, bs.root_dir_offset())?;
        }
        BootSector::Fat32(fat32) => {
            let zeros = vec![0u8; bs.bytes_per_cluster() as usize];
            device.write_at(&zeros, bs.cluster_offset(fat32.root_cluster))?;
        }
    }

    info!(
        "initialized {} volume: FAT mirrored to {} copies, root directory cleared",
        boot_sector.fat_type().label(),
        bs.num_fats
    );

    Ok(boot_sector)
}

fn build_boot_sector(
    device: &mut dyn BlockDevice,
    options: &SuperFloppyOptions,
) -> Result<BootSector, ForgeError> {
    let fat_type = options.fat_type;
    let bytes_per_sector = device.sector_size();
    let total_sectors = (device.len() / bytes_per_sector as u64) as u32;

    let sectors_per_cluster = sectors_per_cluster(fat_type, total_sectors, bytes_per_sector)?;
    let reserved_sector_count = match fat_type {
        FatType::Fat32 => 32,
        _ => 1,
    };
    let num_fats = 2u8;
    let root_entry_count = match fat_type {
        FatType::Fat32 => 0,
        _ => root_entry_count(device.len()),
    };
    let sectors_per_fat = sectors_per_fat(
        fat_type,
        total_sectors,
        bytes_per_sector,
        reserved_sector_count,
        num_fats,
        root_entry_count,
        sectors_per_cluster,
    );

    info!(
        "{} super floppy geometry: {} sectors, {} sectors/cluster, {} sectors/FAT, {} root entries",
        fat_type.label(),
        total_sectors,
        sectors_per_cluster,
        sectors_per_fat,
        root_entry_count
    );

    let common = BootSectorCommon {
        oem_name: options
            .oem_name
            .clone()
            .unwrap_or_else(|| DEFAULT_OEM_NAME.to_string()),
        bytes_per_sector: bytes_per_sector as u16,
        sectors_per_cluster,
        reserved_sector_count,
        num_fats,
        root_entry_count,
        total_sectors,
        media: MEDIA_FIXED,
        sectors_per_fat,
        sectors_per_track: 32,
        num_heads: 64,
    };

    let volume_label = options
        .label
        .clone()
        .unwrap_or_else(|| DEFAULT_LABEL.to_string());
    let volume_id = options.volume_id.unwrap_or_else(generate_volume_serial);

    match fat_type {
        FatType::Fat12 | FatType::Fat16 => Ok(BootSector::Fat16(BootSectorFat16 {
            common,
            drive_number: 0x80,
            volume_id,
            volume_label,
            file_system_type_label: fat_type.label().to_string(),
        })),
        FatType::Fat32 => Ok(BootSector::Fat32(BootSectorFat32 {
            common,
            root_cluster: FAT32_ROOT_CLUSTER,
            fs_info_sector: FAT32_FS_INFO_SECTOR,
            backup_boot_sector: FAT32_BACKUP_BOOT_SECTOR,
            drive_number: 0x80,
            volume_id,
            volume_label,
            file_system_type_label: fat_type.label().to_string(),
        })),
    }
}

/// Cluster size selection per variant. The thresholds for FAT16 and
/// FAT32 follow the standard compatibility tables; FAT12 doubles the
/// cluster size until the count fits.
fn sectors_per_cluster(
    fat_type: FatType,
    total_sectors: u32,
    bytes_per_sector: u32,
) -> Result<u8, ForgeError> {
    match fat_type {
        FatType::Fat12 => {
            let mut spc: u32 = 1;
            while total_sectors / spc > 4084 {
                spc *= 2;
                if spc * bytes_per_sector > 4096 {
                    return Err(ForgeError::Geometry(
                        "device too large for FAT12".to_string(),
                    ));
                }
            }
            Ok(spc as u8)
        }
        FatType::Fat16 => {
            if total_sectors <= 8400 {
                return Err(ForgeError::Geometry(
                    "device too small for FAT16".to_string(),
                ));
            }
            if total_sectors > 4_194_304 {
                return Err(ForgeError::Geometry(
                    "device too large for FAT16".to_string(),
                ));
            }
            Ok(match total_sectors {
                s if s > 2_097_152 => 64,
                s if s > 1_048_576 => 32,
                s if s > 524_288 => 16,
                s if s > 262_144 => 8,
                s if s > 32_680 => 4,
                _ => 2,
            })
        }
        FatType::Fat32 => {
            if total_sectors <= 66_600 {
                return Err(ForgeError::Geometry(
                    "device too small for FAT32".to_string(),
                ));
            }
            Ok(match total_sectors {
                s if s > 67_108_864 => 64,
                s if s > 33_554_432 => 32,
                s if s > 16_777_216 => 16,
                s if s > 532_480 => 8,
                _ => 1,
            })
        }
    }
}

/// Fixed root directory sizing for FAT12/16: 512 entries on anything
/// bigger than a tiny device, otherwise scaled down to fit.
fn root_entry_count(device_len: u64) -> u16 {
    if device_len > 512 * 5 * 32 {
        512
    } else {
        (device_len / (5 * 32)).min(u16::MAX as u64) as u16
    }
}

/// The standard sectors-per-FAT estimate. Slightly over-reserves, which
/// every implementation tolerates.
fn sectors_per_fat(
    fat_type: FatType,
    total_sectors: u32,
    bytes_per_sector: u32,
    reserved_sector_count: u16,
    num_fats: u8,
    root_entry_count: u16,
    sectors_per_cluster: u8,
) -> u32 {
    let root_dir_sectors =
        (root_entry_count as u32 * 32 + bytes_per_sector - 1) / bytes_per_sector;
    let tmp1 = (total_sectors - (reserved_sector_count as u32 + root_dir_sectors)) as u64;
    let mut tmp2 = (256 * sectors_per_cluster as u32 + num_fats as u32) as u64;
    if fat_type == FatType::Fat32 {
        tmp2 /= 2;
    }
    ((tmp1 + tmp2 - 1) / tmp2) as u32
}

/// Derive a volume serial from the clock, the same way interactive
/// format tools do.
pub fn generate_volume_serial() -> u32 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => (duration.as_secs() as u32).wrapping_add(duration.subsec_nanos()),
        Err(_) => 0x1234_5678,
    }
}

fn build_fs_info_sector(free_clusters: u32, next_free: u32) -> [u8; 512] {
    let mut sector = [0u8; 512];

    sector[0..4].copy_from_slice(&FS_INFO_LEAD_SIG.to_le_bytes());
    sector[484..488].copy_from_slice(&FS_INFO_STRUC_SIG.to_le_bytes());
    sector[488..492].copy_from_slice(&free_clusters.to_le_bytes());
    sector[492..496].copy_from_slice(&next_free.to_le_bytes());
    sector[508..512].copy_from_slice(&[0x00, 0x00, 0x55, 0xAA]);

    sector
}
