//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

// Maximum number of multicast-capable virtual interfaces the kernel
// forwarding cache can reference.
pub const MAXVIFS: usize = 32;

// Default TTL threshold programmed on newly attached VIFs.
pub const DEFAULT_TTL_THRESHOLD: u8 = 1;

// Index of a kernel virtual multicast interface.
pub type VifIndex = u16;

// Set of VIF indexes, used for outgoing interface lists.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct VifSet(u32);

// Per-(S,G) forwarding counters reported by the kernel.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SgCounters {
    pub packets: u64,
    pub bytes: u64,
    pub wrong_if: u64,
}

// ===== impl VifSet =====

impl VifSet {
    pub const fn empty() -> VifSet {
        VifSet(0)
    }

    pub fn insert(&mut self, vif: VifIndex) {
        debug_assert!((vif as usize) < MAXVIFS);
        self.0 |= 1 << vif;
    }

    pub fn remove(&mut self, vif: VifIndex) {
        debug_assert!((vif as usize) < MAXVIFS);
        self.0 &= !(1 << vif);
    }

    pub fn set(&mut self, vif: VifIndex, present: bool) {
        if present {
            self.insert(vif);
        } else {
            self.remove(vif);
        }
    }

    pub const fn contains(&self, vif: VifIndex) -> bool {
        self.0 & (1 << vif) != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = VifIndex> + '_ {
        (0..MAXVIFS as VifIndex).filter(|vif| self.contains(*vif))
    }
}

impl std::ops::BitOr for VifSet {
    type Output = VifSet;

    fn bitor(self, rhs: VifSet) -> VifSet {
        VifSet(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for VifSet {
    type Output = VifSet;

    fn bitand(self, rhs: VifSet) -> VifSet {
        VifSet(self.0 & rhs.0)
    }
}

impl std::ops::Sub for VifSet {
    type Output = VifSet;

    fn sub(self, rhs: VifSet) -> VifSet {
        VifSet(self.0 & !rhs.0)
    }
}

impl FromIterator<VifIndex> for VifSet {
    fn from_iter<I: IntoIterator<Item = VifIndex>>(iter: I) -> VifSet {
        let mut set = VifSet::empty();
        for vif in iter {
            set.insert(vif);
        }
        set
    }
}

impl std::fmt::Display for VifSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        write!(f, "{{")?;
        for vif in self.iter() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", vif)?;
            first = false;
        }
        write!(f, "}}")
    }
}
