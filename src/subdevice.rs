//! Subdevices and the per-device subdevice table.
//!
//! A subdevice is one function block of the FPGA design (GPIO, PWM, counter,
//! ...), described by a header in the device's address space. The table keeps
//! them in discovery order and hands out ids contiguously from 0.

use alloc::vec::Vec;

use axerrno::{ax_err, AxError, AxResult};
use spin::RwLock;

use crate::device::DeviceId;

/// Maximum number of subdevices one device can hold.
pub const MAX_NOF_SUBDEVICES: usize = 256;

/// Function id of the info subdevice.
pub const INFO_FUNCTION_ID: u16 = 0x00;

/// Identifier of a subdevice, unique within its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubdeviceId(pub u8);

/// The function triple packed into the first header word.
///
/// Bits 31-16 hold the function id, bits 15-8 the sub-function id and bits
/// 7-0 the function version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionType {
    /// Function class, e.g. GPIO or PWM. 0 is the info function.
    pub function_id: u16,
    /// Variant within the function class.
    pub sub_function_id: u8,
    /// Revision of the function block.
    pub version: u8,
}

impl FunctionType {
    /// Unpacks a raw function word.
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            function_id: (raw >> 16) as u16,
            sub_function_id: (raw >> 8) as u8,
            version: raw as u8,
        }
    }

    /// Packs the triple back into its header word.
    pub const fn raw(&self) -> u32 {
        ((self.function_id as u32) << 16) | ((self.sub_function_id as u32) << 8) | self.version as u32
    }

    /// Whether this is the info function, which carries the total address
    /// space length.
    #[inline]
    pub const fn is_info(&self) -> bool {
        self.function_id == INFO_FUNCTION_ID
    }
}

/// Header fields read by the scanner before a subdevice gets its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubdeviceHeader {
    pub function: FunctionType,
    /// Offset of the header in the device address space.
    pub base_addr: u32,
    /// Declared size in bytes, header included.
    pub mem_size: u32,
    /// Number of channels the block provides.
    pub nof_channels: u32,
    /// Design-assigned identifier, opaque to the driver.
    pub unique_id: u32,
}

/// One discovered function block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subdevice {
    /// Position in discovery order.
    pub id: SubdeviceId,
    /// The device this subdevice lives in.
    pub parent: DeviceId,
    pub function: FunctionType,
    /// Byte offset of the header within the parent's address space.
    pub base_addr: u32,
    /// Size in bytes, header included.
    pub mem_size: u32,
    /// Number of channels the block provides.
    pub nof_channels: u32,
    /// Design-assigned identifier.
    pub unique_id: u32,
}

impl Subdevice {
    /// Descriptor as handed to user space.
    pub fn info(&self) -> SubdeviceInfo {
        SubdeviceInfo {
            id: self.id.0,
            function_id: self.function.function_id,
            sub_function_id: self.function.sub_function_id,
            function_version: self.function.version,
            base_addr: self.base_addr,
            mem_size: self.mem_size,
            nof_channels: self.nof_channels,
            unique_id: self.unique_id,
        }
    }

    /// Whether `offset` lies within the declared size.
    ///
    /// The end offset itself is accepted, matching the stream interface.
    #[inline]
    pub fn accepts_offset(&self, offset: u32) -> bool {
        offset <= self.mem_size
    }
}

/// User-visible subdevice descriptor.
///
/// Fields mirror those of [`Subdevice`], with the function triple flattened
/// and `id` as its raw number.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubdeviceInfo {
    pub id: u8,
    pub function_id: u16,
    pub sub_function_id: u8,
    pub function_version: u8,
    pub base_addr: u32,
    pub mem_size: u32,
    pub nof_channels: u32,
    pub unique_id: u32,
}

impl SubdeviceInfo {
    /// Size of the C layout in bytes.
    pub const SIZE: usize = core::mem::size_of::<SubdeviceInfo>();

    /// Serializes into the C layout (native endian, padding zeroed).
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.id;
        out[2..4].copy_from_slice(&self.function_id.to_ne_bytes());
        out[4] = self.sub_function_id;
        out[5] = self.function_version;
        out[8..12].copy_from_slice(&self.base_addr.to_ne_bytes());
        out[12..16].copy_from_slice(&self.mem_size.to_ne_bytes());
        out[16..20].copy_from_slice(&self.nof_channels.to_ne_bytes());
        out[20..24].copy_from_slice(&self.unique_id.to_ne_bytes());
        out
    }
}

struct Entries {
    list: Vec<Subdevice>,
    /// Next id to hand out; ids are never reused until the table is destroyed.
    next_id: usize,
}

/// Ordered subdevices of one device.
pub struct SubdeviceTable {
    parent: DeviceId,
    entries: RwLock<Entries>,
}

impl SubdeviceTable {
    /// Creates an empty table for the device `parent`.
    pub const fn new(parent: DeviceId) -> Self {
        Self {
            parent,
            entries: RwLock::new(Entries {
                list: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Device owning this table.
    #[inline]
    pub fn parent(&self) -> DeviceId {
        self.parent
    }

    /// Appends a subdevice and assigns it the next id.
    ///
    /// # Errors
    ///
    /// `NoMemory` if the id space is used up or the entry cannot be allocated.
    pub fn append(&self, header: SubdeviceHeader) -> AxResult<SubdeviceId> {
        let mut entries = self.entries.write();
        if entries.next_id >= MAX_NOF_SUBDEVICES {
            return ax_err!(NoMemory, "subdevice table is full");
        }
        entries
            .list
            .try_reserve(1)
            .map_err(|_| axerrno::ax_err_type!(NoMemory, "cannot grow subdevice table"))?;

        let id = SubdeviceId(entries.next_id as u8);
        entries.next_id += 1;
        entries.list.push(Subdevice {
            id,
            parent: self.parent,
            function: header.function,
            base_addr: header.base_addr,
            mem_size: header.mem_size,
            nof_channels: header.nof_channels,
            unique_id: header.unique_id,
        });
        trace!(
            "{:?}: subdevice {} function {:#06x}.{}.{} at {:#x} size {:#x}",
            self.parent,
            id.0,
            header.function.function_id,
            header.function.sub_function_id,
            header.function.version,
            header.base_addr,
            header.mem_size
        );
        Ok(id)
    }

    /// Looks up a subdevice by id.
    pub fn get(&self, id: SubdeviceId) -> Option<Subdevice> {
        self.entries.read().list.iter().find(|sd| sd.id == id).copied()
    }

    /// Number of subdevices currently in the table.
    pub fn len(&self) -> usize {
        self.entries.read().list.len()
    }

    /// Whether the table holds no subdevice.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ids handed out since the table was created or last
    /// destroyed.
    ///
    /// Detached subdevices keep counting, so every live id is below this
    /// value.
    pub fn id_count(&self) -> usize {
        self.entries.read().next_id
    }

    /// Copies of all subdevices in discovery order.
    pub fn list(&self) -> Vec<Subdevice> {
        self.entries.read().list.clone()
    }

    /// Unlinks one subdevice. The remaining ids are left untouched.
    pub fn detach(&self, id: SubdeviceId) -> AxResult<Subdevice> {
        let mut entries = self.entries.write();
        let pos = entries
            .list
            .iter()
            .position(|sd| sd.id == id)
            .ok_or(AxError::NotFound)?;
        Ok(entries.list.remove(pos))
    }

    /// Removes every subdevice, returning how many there were.
    pub fn destroy(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.list.len();
        entries.list = Vec::new();
        entries.next_id = 0;
        removed
    }
}

impl core::fmt::Debug for SubdeviceTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubdeviceTable")
            .field("parent", &self.parent)
            .field("len", &self.len())
            .finish()
    }
}
