// Directory browsing and mutation: logical entries assembled from the
// raw slot list, name lookup and subdirectory creation.

use chrono::{DateTime, Local};
use fatforge_core::{BlockDevice, ForgeError};
use log::debug;

use crate::directory_cluster::{
    attr, build_lfn_entries, lfn_checksum, DirectoryCluster, DirectoryClusterEntry, LfnEntry,
    ShortEntry,
};
use crate::filesystem::FileSystem;
use crate::short_name::generate_short_name;

/// A logical directory entry: the short entry plus the reconstructed
/// long name, if one was stored.
#[derive(Debug, Clone)]
pub struct DirEntry {
    name: String,
    short: ShortEntry,
}

impl DirEntry {
    /// The display name: the long name when present, the trimmed 8.3
    /// name otherwise.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dir(&self) -> bool {
        self.short.is_directory()
    }

    /// The 8.3 form of the name, always available.
    pub fn short_name(&self) -> String {
        self.short.simple_name()
    }

    pub fn first_cluster(&self) -> u32 {
        self.short.cluster
    }

    pub fn file_size(&self) -> u32 {
        self.short.file_size
    }

    pub fn attributes(&self) -> u8 {
        self.short.attributes
    }

    pub fn create_time(&self) -> DateTime<Local> {
        self.short.create_time
    }

    pub fn access_time(&self) -> DateTime<Local> {
        self.short.access_time
    }

    pub fn write_time(&self) -> DateTime<Local> {
        self.short.write_time
    }
}

/// A directory of the volume: the FAT12/16 fixed root, the FAT32 root
/// chain, or any subdirectory chain.
///
/// Holds the filesystem borrow for its lifetime; the block device is
/// borrowed per call.
pub struct Directory<'fs> {
    fs: &'fs mut FileSystem,
    cluster: DirectoryCluster,
}

impl<'fs> Directory<'fs> {
    pub(crate) fn new(fs: &'fs mut FileSystem, cluster: DirectoryCluster) -> Self {
        Self { fs, cluster }
    }

    /// Assemble the logical entries: deleted slots are skipped, LFN
    /// groups are folded into the short entry that follows them.
    pub fn entries(&self) -> Result<Vec<DirEntry>, ForgeError> {
        let mut result = Vec::new();
        let mut pending_lfn: Vec<&LfnEntry> = Vec::new();

        for entry in self.cluster.entries() {
            match entry {
                DirectoryClusterEntry::Long(lfn) => {
                    if lfn.deleted {
                        continue;
                    }
                    pending_lfn.push(lfn);
                }
                DirectoryClusterEntry::Short(short) => {
                    if short.deleted {
                        pending_lfn.clear();
                        continue;
                    }
                    if short.is_volume_label() {
                        pending_lfn.clear();
                        continue;
                    }

                    let name = if pending_lfn.is_empty() {
                        short.simple_name()
                    } else {
                        assemble_long_name(&pending_lfn, short)?
                    };
                    pending_lfn.clear();

                    result.push(DirEntry {
                        name,
                        short: short.clone(),
                    });
                }
            }
        }

        if !pending_lfn.is_empty() {
            return Err(ForgeError::CorruptLfn(
                "long name entries with no short entry following them".to_string(),
            ));
        }

        Ok(result)
    }

    /// Look up an entry by name, case-insensitively.
    pub fn find(&self, name: &str) -> Result<Option<DirEntry>, ForgeError> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(name)))
    }

    /// Create an empty subdirectory named `name` and return its entry.
    pub fn add_directory(
        &mut self,
        device: &mut dyn BlockDevice,
        name: &str,
    ) -> Result<DirEntry, ForgeError> {
        if self.find(name)?.is_some() {
            return Err(ForgeError::NameExists(name.to_string()));
        }

        let used: Vec<String> = self
            .cluster
            .entries()
            .iter()
            .filter_map(|e| match e {
                DirectoryClusterEntry::Short(s) if !s.deleted => Some(s.simple_name()),
                _ => None,
            })
            .collect();
        let short_name = generate_short_name(name, &used)?;
        debug!("creating directory '{}' with short name {}", name, short_name);

        // The new directory needs its own chain before anything
        // references it, and the FAT must hit the device before any
        // directory bytes do.
        let new_cluster = self.fs.fat.alloc_chain()?;
        self.fs.fat.write_to_device(device)?;

        let now = Local::now();
        let short = ShortEntry::new(&short_name, attr::DIRECTORY, new_cluster, now);

        // Long name slots go first, last fragment leading
        if short_name != name.to_uppercase() {
            for lfn in build_lfn_entries(name, &short.canonical_name()) {
                self.cluster.push(DirectoryClusterEntry::Long(lfn))?;
            }
        }
        self.cluster.push(DirectoryClusterEntry::Short(short.clone()))?;
        self.cluster.write_to_device(device, &mut self.fs.fat)?;

        // The child starts out with just its dot entries; `..` points
        // at cluster 0 when the parent is the root
        let parent_cluster = if self.cluster.is_root() {
            0
        } else {
            self.cluster.start_cluster()
        };
        DirectoryCluster::new_subdirectory(new_cluster, parent_cluster, now)
            .write_to_device(device, &mut self.fs.fat)?;

        Ok(DirEntry {
            name: name.to_string(),
            short,
        })
    }

    /// Descend into a subdirectory entry of this directory.
    ///
    /// Panics if `entry` is not a directory; that is a caller bug, not
    /// an I/O condition.
    pub fn open_dir(
        &mut self,
        device: &mut dyn BlockDevice,
        entry: &DirEntry,
    ) -> Result<Directory<'_>, ForgeError> {
        assert!(
            entry.is_dir(),
            "'{}' is not a directory entry",
            entry.name()
        );

        let cluster =
            DirectoryCluster::decode_chain(device, &mut self.fs.fat, entry.first_cluster())?;
        Ok(Directory {
            fs: &mut *self.fs,
            cluster,
        })
    }
}

/// Fold an on-disk LFN group (last fragment first) back into the long
/// name, verifying every slot's checksum against the short entry.
fn assemble_long_name(group: &[&LfnEntry], short: &ShortEntry) -> Result<String, ForgeError> {
    let expected = lfn_checksum(&short.canonical_name());
    for lfn in group {
        if lfn.checksum != expected {
            return Err(ForgeError::CorruptLfn(format!(
                "checksum {:#04x} does not match short name '{}' ({:#04x})",
                lfn.checksum,
                short.simple_name(),
                expected
            )));
        }
    }

    let mut name = String::new();
    for lfn in group.iter().rev() {
        name.push_str(&lfn.fragment);
    }
    Ok(name)
}
