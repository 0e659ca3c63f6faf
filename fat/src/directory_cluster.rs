// The 32-byte directory entry codec: short (8.3) entries, long-filename
// chains, deletion markers and whole-cluster serialization.

use chrono::{DateTime, Local};
use fatforge_core::{BlockDevice, ForgeError};

use crate::boot_sector::BootSectorCommon;
use crate::cluster_chain::ClusterChain;
use crate::constants::*;
use crate::fat_table::Fat;
use crate::timestamps::{decode_dos_datetime, encode_dos_datetime};

/// Attribute bits at offset 11 of every entry.
pub mod attr {
    pub const READ_ONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const VOLUME_ID: u8 = 0x08;
    pub const DIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;
    pub const LONG_NAME: u8 = READ_ONLY | HIDDEN | SYSTEM | VOLUME_ID;
}

/// A regular 8.3 directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortEntry {
    pub name: String,
    pub ext: String,
    pub attributes: u8,
    pub create_time: DateTime<Local>,
    pub access_time: DateTime<Local>,
    pub write_time: DateTime<Local>,
    pub cluster: u32,
    pub file_size: u32,
    pub deleted: bool,
}

impl ShortEntry {
    /// Build a directory entry from an 8.3 name string like "MYDIR~1.TXT",
    /// with all three timestamps set to `now`.
    pub fn new(simple_name: &str, attributes: u8, cluster: u32, now: DateTime<Local>) -> Self {
        // "." and ".." are names, not extension separators
        let (name, ext) = if simple_name.chars().all(|c| c == '.') {
            (simple_name.to_string(), String::new())
        } else {
            match simple_name.rfind('.') {
                Some(idx) => (
                    simple_name[..idx].to_string(),
                    simple_name[idx + 1..].to_string(),
                ),
                None => (simple_name.to_string(), String::new()),
            }
        };

        Self {
            name,
            ext,
            attributes,
            create_time: now,
            access_time: now,
            write_time: now,
            cluster,
            file_size: 0,
            deleted: false,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & attr::DIRECTORY != 0
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes & attr::VOLUME_ID != 0
    }

    /// The trimmed "NAME.EXT" form (no dot when the extension is empty).
    pub fn simple_name(&self) -> String {
        if self.ext.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.ext)
        }
    }

    /// The canonical 11-byte on-disk name: 8 name bytes then 3 extension
    /// bytes, space-padded, no dot. This is what the LFN checksum covers.
    /// Characters map to single bytes, mirroring the byte-as-char decode.
    pub fn canonical_name(&self) -> [u8; 11] {
        let mut out = [b' '; 11];
        for (i, c) in self.name.chars().take(8).enumerate() {
            out[i] = c as u8;
        }
        for (i, c) in self.ext.chars().take(3).enumerate() {
            out[8 + i] = c as u8;
        }
        out
    }

    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut data = [0u8; DIR_ENTRY_SIZE];

        let mut name = self.canonical_name();
        // A real leading 0xE5 is stored as 0x05 so it does not read as
        // a deletion marker
        if name[0] == DELETED_ENTRY_MARKER {
            name[0] = 0x05;
        }
        data[0..11].copy_from_slice(&name);
        if self.deleted {
            data[0] = DELETED_ENTRY_MARKER;
        }

        data[11] = self.attributes;
        // offset 12 is the reserved NT byte, kept zero

        let (create_date, create_time, create_tenths) = encode_dos_datetime(self.create_time);
        data[13] = create_tenths;
        data[14..16].copy_from_slice(&create_time.to_le_bytes());
        data[16..18].copy_from_slice(&create_date.to_le_bytes());

        let (access_date, _, _) = encode_dos_datetime(self.access_time);
        data[18..20].copy_from_slice(&access_date.to_le_bytes());

        data[20..22].copy_from_slice(&((self.cluster >> 16) as u16).to_le_bytes());

        let (write_date, write_time, _) = encode_dos_datetime(self.write_time);
        data[22..24].copy_from_slice(&write_time.to_le_bytes());
        data[24..26].copy_from_slice(&write_date.to_le_bytes());

        data[26..28].copy_from_slice(&((self.cluster & 0xFFFF) as u16).to_le_bytes());
        data[28..32].copy_from_slice(&self.file_size.to_le_bytes());

        data
    }

    pub fn decode(data: &[u8]) -> Self {
        let deleted = data[0] == DELETED_ENTRY_MARKER;

        let mut name_bytes = [0u8; 11];
        name_bytes.copy_from_slice(&data[0..11]);
        if name_bytes[0] == 0x05 {
            name_bytes[0] = DELETED_ENTRY_MARKER;
        }
        let name = trim_name(&name_bytes[0..8]);
        let ext = trim_name(&name_bytes[8..11]);

        let create_tenths = data[13];
        let create_time = u16::from_le_bytes([data[14], data[15]]);
        let create_date = u16::from_le_bytes([data[16], data[17]]);
        let access_date = u16::from_le_bytes([data[18], data[19]]);
        let write_time = u16::from_le_bytes([data[22], data[23]]);
        let write_date = u16::from_le_bytes([data[24], data[25]]);

        let cluster_high = u16::from_le_bytes([data[20], data[21]]) as u32;
        let cluster_low = u16::from_le_bytes([data[26], data[27]]) as u32;

        Self {
            name,
            ext,
            attributes: data[11],
            create_time: decode_dos_datetime(create_date, create_time, create_tenths),
            access_time: decode_dos_datetime(access_date, 0, 0),
            write_time: decode_dos_datetime(write_date, write_time, 0),
            cluster: (cluster_high << 16) | cluster_low,
            file_size: u32::from_le_bytes([data[28], data[29], data[30], data[31]]),
            deleted,
        }
    }
}

/// One slot of a long-filename chain, holding up to 13 UTF-16 units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfnEntry {
    /// Low 5 bits: fragment sequence number (1-based). Bit 6 marks the
    /// entry that carries the final fragment of the name, which is the
    /// first slot of the group on disk.
    pub ord: u8,
    pub fragment: String,
    pub checksum: u8,
    pub deleted: bool,
}

impl LfnEntry {
    pub fn sequence(&self) -> u8 {
        self.ord & 0x1F
    }

    pub fn is_last_fragment(&self) -> bool {
        self.ord & LAST_LONG_ENTRY_MASK != 0
    }

    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut data = [0u8; DIR_ENTRY_SIZE];
        data[0] = if self.deleted {
            DELETED_ENTRY_MARKER
        } else {
            self.ord
        };

        // Short fragments end with one 0x0000 unit, then 0xFFFF fill
        let mut units: Vec<u16> = self.fragment.encode_utf16().collect();
        if units.len() < LFN_CHARS_PER_ENTRY {
            units.push(0);
        }
        while units.len() < LFN_CHARS_PER_ENTRY {
            units.push(0xFFFF);
        }

        for (i, unit) in units[0..5].iter().enumerate() {
            data[1 + i * 2..3 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        data[11] = attr::LONG_NAME;
        data[12] = 0;
        data[13] = self.checksum;
        for (i, unit) in units[5..11].iter().enumerate() {
            data[14 + i * 2..16 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        // offset 26: the cluster word, always zero for LFN slots
        for (i, unit) in units[11..13].iter().enumerate() {
            data[28 + i * 2..30 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }

        data
    }

    pub fn decode(data: &[u8]) -> Self {
        let mut units = [0u16; LFN_CHARS_PER_ENTRY];
        for i in 0..5 {
            units[i] = u16::from_le_bytes([data[1 + i * 2], data[2 + i * 2]]);
        }
        for i in 0..6 {
            units[5 + i] = u16::from_le_bytes([data[14 + i * 2], data[15 + i * 2]]);
        }
        for i in 0..2 {
            units[11 + i] = u16::from_le_bytes([data[28 + i * 2], data[29 + i * 2]]);
        }

        let used: Vec<u16> = units
            .iter()
            .copied()
            .take_while(|&u| u != 0)
            .filter(|&u| u != 0xFFFF)
            .collect();

        Self {
            ord: data[0],
            fragment: String::from_utf16_lossy(&used),
            checksum: data[13],
            deleted: data[0] == DELETED_ENTRY_MARKER,
        }
    }
}

/// Checksum of the canonical 11-byte short name, stored in every LFN
/// slot of the group.
pub fn lfn_checksum(canonical_name: &[u8; 11]) -> u8 {
    let mut sum = 0u8;
    for &b in canonical_name {
        sum = ((sum >> 1) | ((sum & 1) << 7)).wrapping_add(b);
    }
    sum
}

/// Build the LFN slots for `long_name`, in on-disk order: the final
/// fragment comes first and carries the last-entry mark in its ord.
pub fn build_lfn_entries(long_name: &str, short_canonical: &[u8; 11]) -> Vec<LfnEntry> {
    let checksum = lfn_checksum(short_canonical);
    let units: Vec<u16> = long_name.encode_utf16().collect();
    let fragments: Vec<&[u16]> = units.chunks(LFN_CHARS_PER_ENTRY).collect();

    let mut entries = Vec::with_capacity(fragments.len());
    for (i, fragment) in fragments.iter().enumerate().rev() {
        let mut ord = (i + 1) as u8;
        if i == fragments.len() - 1 {
            ord |= LAST_LONG_ENTRY_MASK;
        }
        entries.push(LfnEntry {
            ord,
            fragment: String::from_utf16_lossy(fragment),
            checksum,
            deleted: false,
        });
    }

    entries
}

/// One decoded slot of a directory region, discriminated by the
/// attribute byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryClusterEntry {
    Short(ShortEntry),
    Long(LfnEntry),
}

impl DirectoryClusterEntry {
    pub fn decode(data: &[u8]) -> Self {
        // The attribute byte decides the kind; a deleted slot keeps it
        if data[11] & attr::LONG_NAME == attr::LONG_NAME {
            DirectoryClusterEntry::Long(LfnEntry::decode(data))
        } else {
            DirectoryClusterEntry::Short(ShortEntry::decode(data))
        }
    }

    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        match self {
            DirectoryClusterEntry::Short(e) => e.encode(),
            DirectoryClusterEntry::Long(e) => e.encode(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            DirectoryClusterEntry::Short(e) => e.deleted,
            DirectoryClusterEntry::Long(e) => e.deleted,
        }
    }
}

/// The decoded contents of one directory: either the fixed FAT12/16
/// root region or a cluster chain (the FAT32 root and every
/// subdirectory).
#[derive(Debug, Clone)]
pub struct DirectoryCluster {
    entries: Vec<DirectoryClusterEntry>,
    entry_capacity: usize,
    fat16_root: bool,
    is_root: bool,
    start_cluster: u32,
}

impl DirectoryCluster {
    /// Decode a chain-backed directory starting at `start_cluster`.
    pub fn decode_chain(
        device: &mut dyn BlockDevice,
        fat: &mut Fat,
        start_cluster: u32,
    ) -> Result<Self, ForgeError> {
        let data = ClusterChain::new(device, fat, start_cluster).read_to_end()?;
        let entries = decode_entries(&data);

        Ok(Self {
            entries,
            entry_capacity: data.len() / DIR_ENTRY_SIZE,
            fat16_root: false,
            is_root: false,
            start_cluster,
        })
    }

    /// Decode the fixed root directory region of a FAT12/16 volume.
    pub fn decode_fat16_root(
        device: &mut dyn BlockDevice,
        bs: &BootSectorCommon,
    ) -> Result<Self, ForgeError> {
        let mut data = vec![0u8; bs.root_dir_bytes() as usize];
        device.read_at(&mut data, bs.root_dir_offset())?;
        let entries = decode_entries(&data);

        Ok(Self {
            entries,
            entry_capacity: bs.root_entry_count as usize,
            fat16_root: true,
            is_root: true,
            start_cluster: 0,
        })
    }

    /// An empty FAT12/16 root directory for a fresh volume.
    pub fn new_fat16_root(bs: &BootSectorCommon) -> Result<Self, ForgeError> {
        if bs.root_entry_count == 0 {
            return Err(ForgeError::InvalidField(
                "root entry count is 0 in boot sector".to_string(),
            ));
        }

        Ok(Self {
            entries: Vec::new(),
            entry_capacity: bs.root_entry_count as usize,
            fat16_root: true,
            is_root: true,
            start_cluster: 0,
        })
    }

    /// A fresh subdirectory cluster holding only its `.` and `..`
    /// entries. `parent_cluster` must already be 0 when the parent is
    /// the root.
    pub fn new_subdirectory(
        start_cluster: u32,
        parent_cluster: u32,
        now: DateTime<Local>,
    ) -> Self {
        let dot = ShortEntry::new(".", attr::DIRECTORY, start_cluster, now);
        let dotdot = ShortEntry::new("..", attr::DIRECTORY, parent_cluster, now);

        Self {
            entries: vec![
                DirectoryClusterEntry::Short(dot),
                DirectoryClusterEntry::Short(dotdot),
            ],
            entry_capacity: usize::MAX,
            fat16_root: false,
            is_root: false,
            start_cluster,
        }
    }

    pub(crate) fn mark_root(mut self) -> Self {
        self.is_root = true;
        self
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn start_cluster(&self) -> u32 {
        self.start_cluster
    }

    pub fn entries(&self) -> &[DirectoryClusterEntry] {
        &self.entries
    }

    /// Append a slot. The fixed FAT12/16 root cannot grow past its
    /// entry capacity.
    pub fn push(&mut self, entry: DirectoryClusterEntry) -> Result<(), ForgeError> {
        if self.fat16_root && self.entries.len() >= self.entry_capacity {
            return Err(ForgeError::NoSpace);
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Serialize every slot in order. The region is padded with zeros —
    /// which is what makes the first unused slot the end sentinel — to
    /// the fixed root size, or to whole clusters.
    fn to_region_bytes(&self, bs: &BootSectorCommon) -> Vec<u8> {
        let used = self.entries.len() * DIR_ENTRY_SIZE;
        let region = if self.fat16_root {
            self.entry_capacity * DIR_ENTRY_SIZE
        } else {
            let bpc = bs.bytes_per_cluster() as usize;
            let clusters = (used.max(1) + bpc - 1) / bpc;
            clusters * bpc
        };

        let mut data = vec![0u8; region];
        for (i, entry) in self.entries.iter().enumerate() {
            data[i * DIR_ENTRY_SIZE..(i + 1) * DIR_ENTRY_SIZE].copy_from_slice(&entry.encode());
        }
        data
    }

    /// Write this directory's own bytes back to the device: directly
    /// into the fixed region for the FAT12/16 root, through the cluster
    /// chain (growing it as needed) otherwise.
    pub fn write_to_device(
        &self,
        device: &mut dyn BlockDevice,
        fat: &mut Fat,
    ) -> Result<(), ForgeError> {
        if self.fat16_root && self.entries.len() > self.entry_capacity {
            return Err(ForgeError::NoSpace);
        }

        let data = self.to_region_bytes(fat.boot_sector());
        if self.fat16_root {
            device.write_at(&data, fat.boot_sector().root_dir_offset())?;
            Ok(())
        } else {
            ClusterChain::new(device, fat, self.start_cluster).write(&data)
        }
    }
}

fn decode_entries(data: &[u8]) -> Vec<DirectoryClusterEntry> {
    let mut entries = Vec::new();
    for slot in data.chunks_exact(DIR_ENTRY_SIZE) {
        // First-byte-zero marks the end of the used region
        if slot[0] == 0 {
            break;
        }
        entries.push(DirectoryClusterEntry::decode(slot));
    }
    entries
}

fn trim_name(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |i| i + 1);
    bytes[..end].iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2021, 5, 17, 12, 0, 0).single().unwrap()
    }

    fn midnight() -> DateTime<Local> {
        Local.with_ymd_and_hms(2021, 5, 17, 0, 0, 0).single().unwrap()
    }

    #[test]
    fn short_entry_round_trip() {
        let entry = ShortEntry {
            name: "README".to_string(),
            ext: "TXT".to_string(),
            attributes: attr::ARCHIVE,
            create_time: noon(),
            // only the date of the last access survives on disk
            access_time: midnight(),
            write_time: noon(),
            cluster: 0x0004_0003,
            file_size: 1234,
            deleted: false,
        };

        let data = entry.encode();
        assert_eq!(&data[0..11], b"README  TXT");
        assert_eq!(data[11], attr::ARCHIVE);
        // Cluster words: high at 20, low at 26
        assert_eq!(u16::from_le_bytes([data[20], data[21]]), 4);
        assert_eq!(u16::from_le_bytes([data[26], data[27]]), 3);

        let decoded = ShortEntry::decode(&data);
        assert_eq!(decoded, entry);
    }

    #[test]
    fn deleted_entry_marker_round_trips() {
        let mut entry = ShortEntry::new("GONE.TXT", attr::ARCHIVE, 5, noon());
        entry.deleted = true;

        let data = entry.encode();
        assert_eq!(data[0], 0xE5);
        assert!(ShortEntry::decode(&data).deleted);
    }

    #[test]
    fn leading_0xe5_is_stored_as_0x05() {
        let entry = ShortEntry {
            name: "\u{e5}AB".to_string(),
            ext: String::new(),
            attributes: attr::ARCHIVE,
            create_time: noon(),
            access_time: noon(),
            write_time: noon(),
            cluster: 2,
            file_size: 0,
            deleted: false,
        };

        let data = entry.encode();
        assert_eq!(data[0], 0x05);

        let decoded = ShortEntry::decode(&data);
        assert!(!decoded.deleted);
        assert_eq!(decoded.name.chars().next().unwrap() as u32, 0xE5);
    }

    #[test]
    fn checksum_matches_reference_rotation() {
        // Reference value computed with the FAT specification's algorithm
        let mut sum = 0u32;
        for &b in b"FILENAMEEXT" {
            sum = (if sum & 1 != 0 { 0x80 } else { 0 }) + (sum >> 1) + b as u32;
            sum &= 0xFF;
        }
        assert_eq!(lfn_checksum(b"FILENAMEEXT"), sum as u8);
    }

    #[test]
    fn lfn_entries_come_out_in_reverse_order() {
        let short = ShortEntry::new("READM~1.TXT", attr::ARCHIVE, 2, noon());
        let entries = build_lfn_entries("ReadMe Long Name.txt", &short.canonical_name());

        // 20 chars over 13-unit fragments
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ord, 2 | LAST_LONG_ENTRY_MASK);
        assert_eq!(entries[0].fragment, "ame.txt");
        assert_eq!(entries[1].ord, 1);
        assert_eq!(entries[1].fragment, "ReadMe Long N");

        let checksum = lfn_checksum(&short.canonical_name());
        assert!(entries.iter().all(|e| e.checksum == checksum));
    }

    #[test]
    fn lfn_entry_round_trip() {
        let entry = LfnEntry {
            ord: 1 | LAST_LONG_ENTRY_MASK,
            fragment: "hello.txt".to_string(),
            checksum: 0x42,
            deleted: false,
        };

        let data = entry.encode();
        assert_eq!(data[11], attr::LONG_NAME);
        assert_eq!(data[13], 0x42);
        // The cluster word of an LFN slot stays zero
        assert_eq!(&data[26..28], &[0, 0]);

        let decoded = LfnEntry::decode(&data);
        assert_eq!(decoded, entry);
    }

    #[test]
    fn directory_bytes_end_with_a_zero_sentinel() {
        let mut cluster = DirectoryCluster {
            entries: Vec::new(),
            entry_capacity: 16,
            fat16_root: true,
            is_root: true,
            start_cluster: 0,
        };
        cluster
            .push(DirectoryClusterEntry::Short(ShortEntry::new(
                "A.TXT",
                attr::ARCHIVE,
                2,
                noon(),
            )))
            .unwrap();

        let bs = crate::boot_sector::BootSectorCommon {
            oem_name: "FATFORGE".to_string(),
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sector_count: 1,
            num_fats: 2,
            root_entry_count: 16,
            total_sectors: 2880,
            media: MEDIA_FIXED,
            sectors_per_fat: 9,
            sectors_per_track: 32,
            num_heads: 64,
        };
        let data = cluster.to_region_bytes(&bs);
        assert_eq!(data.len(), 16 * DIR_ENTRY_SIZE);
        assert_ne!(data[0], 0);
        // Slot after the last used entry starts with the sentinel
        assert_eq!(data[DIR_ENTRY_SIZE], 0);
    }

    #[test]
    fn fixed_root_rejects_overflow() {
        let mut cluster = DirectoryCluster {
            entries: Vec::new(),
            entry_capacity: 2,
            fat16_root: true,
            is_root: true,
            start_cluster: 0,
        };

        for name in ["A", "B"] {
            cluster
                .push(DirectoryClusterEntry::Short(ShortEntry::new(
                    name,
                    attr::ARCHIVE,
                    2,
                    noon(),
                )))
                .unwrap();
        }
        let overflow = cluster.push(DirectoryClusterEntry::Short(ShortEntry::new(
            "C",
            attr::ARCHIVE,
            2,
            noon(),
        )));
        assert!(matches!(overflow, Err(ForgeError::NoSpace)));
    }

    #[test]
    fn subdirectory_template_has_dot_entries() {
        let cluster = DirectoryCluster::new_subdirectory(7, 0, noon());
        let entries = cluster.entries();
        assert_eq!(entries.len(), 2);

        match (&entries[0], &entries[1]) {
            (DirectoryClusterEntry::Short(dot), DirectoryClusterEntry::Short(dotdot)) => {
                assert_eq!(dot.name, ".");
                assert_eq!(dot.cluster, 7);
                assert!(dot.is_directory());
                assert_eq!(dotdot.name, "..");
                assert_eq!(dotdot.cluster, 0);
                assert!(dotdot.is_directory());
            }
            other => panic!("unexpected entries: {:?}", other),
        }
    }
}
