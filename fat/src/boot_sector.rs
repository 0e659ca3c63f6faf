// Boot sector (BPB) encoding, decoding and derived volume geometry.
// The two on-disk layouts share a common prefix; the FAT12/16 and FAT32
// tails are encoded by their variant structs.

use fatforge_core::{BlockDevice, ForgeError};
use serde::{Deserialize, Serialize};

use crate::constants::*;

/// The FAT variant of a volume.
///
/// Never configured directly on an existing volume: once the geometry is
/// known the cluster count alone selects the variant, via
/// [`BootSectorCommon::fat_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    /// Mask for the significant bits of a FAT entry.
    pub fn entry_mask(&self) -> u32 {
        match self {
            FatType::Fat12 => FAT12_MASK,
            FatType::Fat16 => FAT16_MASK,
            FatType::Fat32 => FAT32_MASK,
        }
    }

    /// Smallest entry value that marks end-of-chain.
    pub fn eoc_threshold(&self) -> u32 {
        match self {
            FatType::Fat12 => FAT12_EOC,
            FatType::Fat16 => FAT16_EOC,
            FatType::Fat32 => FAT32_EOC,
        }
    }

    /// The filesystem-type label stored in the boot sector tail.
    pub fn label(&self) -> &'static str {
        match self {
            FatType::Fat12 => "FAT12",
            FatType::Fat16 => "FAT16",
            FatType::Fat32 => "FAT32",
        }
    }
}

/// Fields common to every FAT boot sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSectorCommon {
    pub oem_name: String,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub num_fats: u8,
    pub root_entry_count: u16,
    pub total_sectors: u32,
    pub media: u8,
    pub sectors_per_fat: u32,
    pub sectors_per_track: u16,
    pub num_heads: u16,
}

impl BootSectorCommon {
    pub fn bytes_per_cluster(&self) -> u32 {
        self.sectors_per_cluster as u32 * self.bytes_per_sector as u32
    }

    /// Byte offset of FAT copy `index`.
    pub fn fat_offset(&self, index: u8) -> u64 {
        (self.reserved_sector_count as u64 + index as u64 * self.sectors_per_fat as u64)
            * self.bytes_per_sector as u64
    }

    /// Size of one FAT copy in bytes.
    pub fn fat_size_bytes(&self) -> u32 {
        self.sectors_per_fat * self.bytes_per_sector as u32
    }

    /// Byte offset of the fixed FAT12/16 root directory region, which is
    /// also where the data region begins once the root entries end.
    pub fn root_dir_offset(&self) -> u64 {
        self.reserved_sector_count as u64 * self.bytes_per_sector as u64
            + self.num_fats as u64 * self.sectors_per_fat as u64 * self.bytes_per_sector as u64
    }

    /// Size of the fixed root directory region in bytes (0 on FAT32).
    pub fn root_dir_bytes(&self) -> u32 {
        self.root_entry_count as u32 * DIR_ENTRY_SIZE as u32
    }

    /// Byte offset of data cluster `cluster` (numbered from 2).
    pub fn cluster_offset(&self, cluster: u32) -> u64 {
        self.root_dir_offset()
            + self.root_dir_bytes() as u64
            + (cluster as u64 - 2) * self.bytes_per_cluster() as u64
    }

    /// Number of data clusters on the volume.
    pub fn cluster_count(&self) -> u32 {
        let bps = self.bytes_per_sector as u32;
        let root_dir_sectors = (self.root_dir_bytes() + bps - 1) / bps;
        let overhead = self.reserved_sector_count as u32
            + self.num_fats as u32 * self.sectors_per_fat
            + root_dir_sectors;
        let data_sectors = self.total_sectors.saturating_sub(overhead);
        data_sectors / self.sectors_per_cluster as u32
    }

    /// Derive the FAT variant from the cluster count. This calculation,
    /// straight from the FAT specification, is the only correct way to
    /// determine the variant of a volume.
    pub fn fat_type(&self) -> FatType {
        let clusters = self.cluster_count();
        if clusters < FAT16_MIN_CLUSTERS {
            FatType::Fat12
        } else if clusters < FAT32_MIN_CLUSTERS {
            FatType::Fat16
        } else {
            FatType::Fat32
        }
    }

    /// Encode the shared prefix into a fresh 512-byte sector. The
    /// variant-specific total-sectors and sectors-per-FAT fields are left
    /// for the variant encoders.
    fn encode(&self) -> Result<[u8; 512], ForgeError> {
        let mut sector = [0u8; 512];

        sector[BS_JMP_BOOT..BS_JMP_BOOT + 3].copy_from_slice(&JMP_BOOT);
        put_ascii(&mut sector, BS_OEM_NAME, &self.oem_name, 8, "OEM name")?;

        sector[BPB_BYTES_PER_SEC..BPB_BYTES_PER_SEC + 2]
            .copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        sector[BPB_SEC_PER_CLUS] = self.sectors_per_cluster;
        sector[BPB_RSVD_SEC_CNT..BPB_RSVD_SEC_CNT + 2]
            .copy_from_slice(&self.reserved_sector_count.to_le_bytes());
        sector[BPB_NUM_FATS] = self.num_fats;
        sector[BPB_ROOT_ENT_CNT..BPB_ROOT_ENT_CNT + 2]
            .copy_from_slice(&self.root_entry_count.to_le_bytes());
        sector[BPB_MEDIA] = self.media;
        sector[BPB_SEC_PER_TRK..BPB_SEC_PER_TRK + 2]
            .copy_from_slice(&self.sectors_per_track.to_le_bytes());
        sector[BPB_NUM_HEADS..BPB_NUM_HEADS + 2].copy_from_slice(&self.num_heads.to_le_bytes());
        // Hidden sectors stay zero: a super floppy is never partitioned.

        sector[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2].copy_from_slice(&BOOT_SIGNATURE);

        Ok(sector)
    }

    fn decode(sector: &[u8; 512]) -> Result<Self, ForgeError> {
        let bytes_per_sector =
            u16::from_le_bytes([sector[BPB_BYTES_PER_SEC], sector[BPB_BYTES_PER_SEC + 1]]);
        let sectors_per_cluster = sector[BPB_SEC_PER_CLUS];
        if bytes_per_sector == 0 || sectors_per_cluster == 0 {
            return Err(ForgeError::InvalidField(
                "bytes per sector and sectors per cluster must be non-zero".to_string(),
            ));
        }

        let tot_sec_16 = u16::from_le_bytes([sector[BPB_TOT_SEC16], sector[BPB_TOT_SEC16 + 1]]);
        let tot_sec_32 = u32::from_le_bytes([
            sector[BPB_TOT_SEC32],
            sector[BPB_TOT_SEC32 + 1],
            sector[BPB_TOT_SEC32 + 2],
            sector[BPB_TOT_SEC32 + 3],
        ]);
        let total_sectors = if tot_sec_16 != 0 {
            tot_sec_16 as u32
        } else {
            tot_sec_32
        };

        let fat_sz_16 = u16::from_le_bytes([sector[BPB_FAT_SZ16], sector[BPB_FAT_SZ16 + 1]]);
        let fat_sz_32 = u32::from_le_bytes([
            sector[BPB_FAT_SZ32],
            sector[BPB_FAT_SZ32 + 1],
            sector[BPB_FAT_SZ32 + 2],
            sector[BPB_FAT_SZ32 + 3],
        ]);
        let sectors_per_fat = if fat_sz_16 != 0 {
            fat_sz_16 as u32
        } else {
            fat_sz_32
        };

        Ok(Self {
            oem_name: read_string(&sector[BS_OEM_NAME..BS_OEM_NAME + 8]),
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sector_count: u16::from_le_bytes([
                sector[BPB_RSVD_SEC_CNT],
                sector[BPB_RSVD_SEC_CNT + 1],
            ]),
            num_fats: sector[BPB_NUM_FATS],
            root_entry_count: u16::from_le_bytes([
                sector[BPB_ROOT_ENT_CNT],
                sector[BPB_ROOT_ENT_CNT + 1],
            ]),
            total_sectors,
            media: sector[BPB_MEDIA],
            sectors_per_fat,
            sectors_per_track: u16::from_le_bytes([
                sector[BPB_SEC_PER_TRK],
                sector[BPB_SEC_PER_TRK + 1],
            ]),
            num_heads: u16::from_le_bytes([sector[BPB_NUM_HEADS], sector[BPB_NUM_HEADS + 1]]),
        })
    }
}

/// Boot sector layout used by FAT12 and FAT16 volumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSectorFat16 {
    pub common: BootSectorCommon,
    pub drive_number: u8,
    pub volume_id: u32,
    pub volume_label: String,
    pub file_system_type_label: String,
}

impl BootSectorFat16 {
    pub fn encode(&self) -> Result<[u8; 512], ForgeError> {
        let mut sector = self.common.encode()?;

        // BPB_TotSec16 / BPB_TotSec32
        if self.common.total_sectors < 0x10000 {
            sector[BPB_TOT_SEC16..BPB_TOT_SEC16 + 2]
                .copy_from_slice(&(self.common.total_sectors as u16).to_le_bytes());
        } else {
            sector[BPB_TOT_SEC32..BPB_TOT_SEC32 + 4]
                .copy_from_slice(&self.common.total_sectors.to_le_bytes());
        }

        // BPB_FATSz16 is all this layout has
        if self.common.sectors_per_fat >= 0x10000 {
            return Err(ForgeError::InvalidField(format!(
                "sectors per FAT too large for FAT12/16: {}",
                self.common.sectors_per_fat
            )));
        }
        sector[BPB_FAT_SZ16..BPB_FAT_SZ16 + 2]
            .copy_from_slice(&(self.common.sectors_per_fat as u16).to_le_bytes());

        sector[BS16_DRV_NUM] = self.drive_number;
        sector[BS16_BOOT_SIG] = EXTENDED_BOOT_SIG;
        sector[BS16_VOL_ID..BS16_VOL_ID + 4].copy_from_slice(&self.volume_id.to_le_bytes());
        put_ascii(&mut sector, BS16_VOL_LAB, &self.volume_label, 11, "volume label")?;
        put_ascii(
            &mut sector,
            BS16_FIL_SYS_TYPE,
            &self.file_system_type_label,
            8,
            "filesystem type label",
        )?;

        Ok(sector)
    }

    fn decode(sector: &[u8; 512], common: BootSectorCommon) -> Self {
        Self {
            common,
            drive_number: sector[BS16_DRV_NUM],
            volume_id: u32::from_le_bytes([
                sector[BS16_VOL_ID],
                sector[BS16_VOL_ID + 1],
                sector[BS16_VOL_ID + 2],
                sector[BS16_VOL_ID + 3],
            ]),
            volume_label: read_string(&sector[BS16_VOL_LAB..BS16_VOL_LAB + 11]),
            file_system_type_label: read_string(
                &sector[BS16_FIL_SYS_TYPE..BS16_FIL_SYS_TYPE + 8],
            ),
        }
    }
}

/// Boot sector layout used by FAT32 volumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSectorFat32 {
    pub common: BootSectorCommon,
    pub root_cluster: u32,
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,
    pub drive_number: u8,
    pub volume_id: u32,
    pub volume_label: String,
    pub file_system_type_label: String,
}

impl BootSectorFat32 {
    pub fn encode(&self) -> Result<[u8; 512], ForgeError> {
        let mut sector = self.common.encode()?;

        // FAT32 always uses the 32-bit fields; the 16-bit ones stay zero.
        sector[BPB_TOT_SEC32..BPB_TOT_SEC32 + 4]
            .copy_from_slice(&self.common.total_sectors.to_le_bytes());
        sector[BPB_FAT_SZ32..BPB_FAT_SZ32 + 4]
            .copy_from_slice(&self.common.sectors_per_fat.to_le_bytes());

        // BPB_FSVer must be 0.0 for any reader to accept the volume
        sector[BPB_FS_VER] = 0;
        sector[BPB_FS_VER + 1] = 0;

        sector[BPB_ROOT_CLUS..BPB_ROOT_CLUS + 4].copy_from_slice(&self.root_cluster.to_le_bytes());
        sector[BPB_FS_INFO..BPB_FS_INFO + 2].copy_from_slice(&self.fs_info_sector.to_le_bytes());
        sector[BPB_BK_BOOT_SEC..BPB_BK_BOOT_SEC + 2]
            .copy_from_slice(&self.backup_boot_sector.to_le_bytes());

        sector[BS32_DRV_NUM] = self.drive_number;
        sector[BS32_BOOT_SIG] = EXTENDED_BOOT_SIG;
        sector[BS32_VOL_ID..BS32_VOL_ID + 4].copy_from_slice(&self.volume_id.to_le_bytes());
        put_ascii(&mut sector, BS32_VOL_LAB, &self.volume_label, 11, "volume label")?;
        put_ascii(
            &mut sector,
            BS32_FIL_SYS_TYPE,
            &self.file_system_type_label,
            8,
            "filesystem type label",
        )?;

        Ok(sector)
    }

    fn decode(sector: &[u8; 512], common: BootSectorCommon) -> Self {
        Self {
            common,
            root_cluster: u32::from_le_bytes([
                sector[BPB_ROOT_CLUS],
                sector[BPB_ROOT_CLUS + 1],
                sector[BPB_ROOT_CLUS + 2],
                sector[BPB_ROOT_CLUS + 3],
            ]),
            fs_info_sector: u16::from_le_bytes([sector[BPB_FS_INFO], sector[BPB_FS_INFO + 1]]),
            backup_boot_sector: u16::from_le_bytes([
                sector[BPB_BK_BOOT_SEC],
                sector[BPB_BK_BOOT_SEC + 1],
            ]),
            drive_number: sector[BS32_DRV_NUM],
            volume_id: u32::from_le_bytes([
                sector[BS32_VOL_ID],
                sector[BS32_VOL_ID + 1],
                sector[BS32_VOL_ID + 2],
                sector[BS32_VOL_ID + 3],
            ]),
            volume_label: read_string(&sector[BS32_VOL_LAB..BS32_VOL_LAB + 11]),
            file_system_type_label: read_string(
                &sector[BS32_FIL_SYS_TYPE..BS32_FIL_SYS_TYPE + 8],
            ),
        }
    }
}

/// A decoded boot sector: the common prefix plus one of the two
/// variant-specific tails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootSector {
    Fat16(BootSectorFat16),
    Fat32(BootSectorFat32),
}

impl BootSector {
    pub fn common(&self) -> &BootSectorCommon {
        match self {
            BootSector::Fat16(bs) => &bs.common,
            BootSector::Fat32(bs) => &bs.common,
        }
    }

    pub fn fat_type(&self) -> FatType {
        self.common().fat_type()
    }

    pub fn encode(&self) -> Result<[u8; 512], ForgeError> {
        match self {
            BootSector::Fat16(bs) => bs.encode(),
            BootSector::Fat32(bs) => bs.encode(),
        }
    }

    /// Decode a raw 512-byte boot sector.
    pub fn decode_bytes(sector: &[u8; 512]) -> Result<Self, ForgeError> {
        if sector[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2] != BOOT_SIGNATURE {
            return Err(ForgeError::InvalidField(
                "missing 0x55AA boot sector signature".to_string(),
            ));
        }

        let common = BootSectorCommon::decode(sector)?;

        // A zero root entry count together with a zero 16-bit FAT size
        // can only be the FAT32 layout.
        let fat_sz_16 = u16::from_le_bytes([sector[BPB_FAT_SZ16], sector[BPB_FAT_SZ16 + 1]]);
        if common.root_entry_count == 0 && fat_sz_16 == 0 {
            Ok(BootSector::Fat32(BootSectorFat32::decode(sector, common)))
        } else {
            Ok(BootSector::Fat16(BootSectorFat16::decode(sector, common)))
        }
    }

    /// Read and decode sector 0 of a device.
    pub fn decode(device: &mut dyn BlockDevice) -> Result<Self, ForgeError> {
        let mut sector = [0u8; 512];
        device.read_at(&mut sector, 0)?;
        Self::decode_bytes(&sector)
    }

    /// Encode and write to sector 0 of a device.
    pub fn write_to_device(&self, device: &mut dyn BlockDevice) -> Result<(), ForgeError> {
        let sector = self.encode()?;
        device.write_at(&sector, 0)?;
        Ok(())
    }
}

fn put_ascii(
    sector: &mut [u8; 512],
    offset: usize,
    value: &str,
    max_len: usize,
    field: &str,
) -> Result<(), ForgeError> {
    if value.len() > max_len {
        return Err(ForgeError::InvalidField(format!(
            "{} must be {} bytes or less: '{}'",
            field, max_len, value
        )));
    }

    for (i, b) in value.bytes().enumerate() {
        if !b.is_ascii() {
            return Err(ForgeError::InvalidField(format!(
                "{} contains a non-ASCII character: '{}'",
                field, value
            )));
        }
        sector[offset + i] = b;
    }

    Ok(())
}

fn read_string(data: &[u8]) -> String {
    let end = data
        .iter()
        .rposition(|&b| b != 0 && b != b' ')
        .map_or(0, |i| i + 1);
    data[..end].iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fat16() -> BootSectorFat16 {
        BootSectorFat16 {
            common: BootSectorCommon {
                oem_name: "FATFORGE".to_string(),
                bytes_per_sector: 512,
                sectors_per_cluster: 4,
                reserved_sector_count: 1,
                num_fats: 2,
                root_entry_count: 512,
                total_sectors: 131072,
                media: MEDIA_FIXED,
                sectors_per_fat: 128,
                sectors_per_track: 32,
                num_heads: 64,
            },
            drive_number: 0x80,
            volume_id: 0xDEADBEEF,
            volume_label: "NONAME".to_string(),
            file_system_type_label: "FAT16".to_string(),
        }
    }

    fn sample_fat32() -> BootSectorFat32 {
        BootSectorFat32 {
            common: BootSectorCommon {
                oem_name: "FATFORGE".to_string(),
                bytes_per_sector: 512,
                sectors_per_cluster: 8,
                reserved_sector_count: 32,
                num_fats: 2,
                root_entry_count: 0,
                total_sectors: 1048576,
                media: MEDIA_FIXED,
                sectors_per_fat: 1024,
                sectors_per_track: 32,
                num_heads: 64,
            },
            root_cluster: FAT32_ROOT_CLUSTER,
            fs_info_sector: FAT32_FS_INFO_SECTOR,
            backup_boot_sector: FAT32_BACKUP_BOOT_SECTOR,
            drive_number: 0x80,
            volume_id: 0xCAFEF00D,
            volume_label: "BIGDISK".to_string(),
            file_system_type_label: "FAT32".to_string(),
        }
    }

    #[test]
    fn fat16_round_trip() {
        let bs = sample_fat16();
        let sector = bs.encode().unwrap();

        assert_eq!(&sector[0..3], &JMP_BOOT);
        assert_eq!(sector[510], 0x55);
        assert_eq!(sector[511], 0xAA);
        assert_eq!(sector[BS16_BOOT_SIG], 0x29);

        let decoded = BootSector::decode_bytes(&sector).unwrap();
        assert_eq!(decoded, BootSector::Fat16(bs));
    }

    #[test]
    fn fat16_small_volume_uses_16_bit_sector_count() {
        let mut bs = sample_fat16();
        bs.common.total_sectors = 2880;
        let sector = bs.encode().unwrap();

        assert_eq!(u16::from_le_bytes([sector[19], sector[20]]), 2880);
        assert_eq!(&sector[32..36], &[0, 0, 0, 0]);

        let decoded = BootSector::decode_bytes(&sector).unwrap();
        assert_eq!(decoded.common().total_sectors, 2880);
    }

    #[test]
    fn fat32_round_trip() {
        let bs = sample_fat32();
        let sector = bs.encode().unwrap();

        assert_eq!(sector[510], 0x55);
        assert_eq!(sector[511], 0xAA);
        // 16-bit FAT size and root entry count must be zero on FAT32
        assert_eq!(&sector[17..19], &[0, 0]);
        assert_eq!(&sector[22..24], &[0, 0]);
        // FS version pinned to 0.0
        assert_eq!(&sector[42..44], &[0, 0]);
        assert_eq!(sector[BS32_BOOT_SIG], 0x29);

        let decoded = BootSector::decode_bytes(&sector).unwrap();
        assert_eq!(decoded, BootSector::Fat32(bs));
    }

    #[test]
    fn rejects_oversized_sectors_per_fat() {
        let mut bs = sample_fat16();
        bs.common.sectors_per_fat = 0x10000;
        assert!(matches!(bs.encode(), Err(ForgeError::InvalidField(_))));
    }

    #[test]
    fn rejects_non_ascii_label() {
        let mut bs = sample_fat16();
        bs.volume_label = "disqué".to_string();
        assert!(matches!(bs.encode(), Err(ForgeError::InvalidField(_))));
    }

    #[test]
    fn rejects_overlong_oem_name() {
        let mut bs = sample_fat16();
        bs.common.oem_name = "WAYTOOLONGNAME".to_string();
        assert!(matches!(bs.encode(), Err(ForgeError::InvalidField(_))));
    }

    #[test]
    fn rejects_missing_signature() {
        let sector = [0u8; 512];
        assert!(matches!(
            BootSector::decode_bytes(&sector),
            Err(ForgeError::InvalidField(_))
        ));
    }

    #[test]
    fn fat_type_follows_cluster_count() {
        let mut common = sample_fat16().common;

        // 1.44MB floppy: 2880 sectors, 1 sector per cluster
        common.total_sectors = 2880;
        common.sectors_per_cluster = 1;
        common.sectors_per_fat = 9;
        assert!(common.cluster_count() < 4085);
        assert_eq!(common.fat_type(), FatType::Fat12);

        // 64MB volume with 4-sector clusters lands in FAT16 range
        common.total_sectors = 131072;
        common.sectors_per_cluster = 4;
        common.sectors_per_fat = 128;
        assert_eq!(common.fat_type(), FatType::Fat16);

        // 1GB volume with 8-sector clusters exceeds 65524 clusters
        common.total_sectors = 2097152;
        common.sectors_per_cluster = 8;
        common.sectors_per_fat = 2048;
        common.root_entry_count = 0;
        assert_eq!(common.fat_type(), FatType::Fat32);
    }

    #[test]
    fn derived_offsets() {
        let bs = sample_fat16().common;

        assert_eq!(bs.bytes_per_cluster(), 2048);
        assert_eq!(bs.fat_offset(0), 512);
        assert_eq!(bs.fat_offset(1), 512 + 128 * 512);
        assert_eq!(bs.root_dir_offset(), (1 + 2 * 128) * 512);
        assert_eq!(bs.root_dir_bytes(), 512 * 32);
        assert_eq!(
            bs.cluster_offset(2),
            bs.root_dir_offset() + bs.root_dir_bytes() as u64
        );
        assert_eq!(
            bs.cluster_offset(5),
            bs.root_dir_offset() + bs.root_dir_bytes() as u64 + 3 * 2048
        );
    }
}
