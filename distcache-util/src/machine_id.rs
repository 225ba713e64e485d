// Copyright 2024 The Distcache Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Index of a machine in the fleet. Doubles as the bit position of the
/// machine inside a `MachineIdSet`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(u32);

impl MachineId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for MachineId {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Machine#{}", self.0)
    }
}

/// A batch of machines that are added to or removed from a location set in
/// one step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MachineIdCollection(Vec<MachineId>);

impl MachineIdCollection {
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn single(machine: MachineId) -> Self {
        Self(vec![machine])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, MachineId> {
        self.0.iter()
    }

    /// Highest index in the batch, used to size bitmaps up front.
    pub fn max_index(&self) -> Option<usize> {
        self.0.iter().map(|machine| machine.index()).max()
    }
}

impl From<Vec<MachineId>> for MachineIdCollection {
    fn from(machines: Vec<MachineId>) -> Self {
        Self(machines)
    }
}

impl FromIterator<MachineId> for MachineIdCollection {
    fn from_iter<T: IntoIterator<Item = MachineId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a MachineIdCollection {
    type Item = &'a MachineId;
    type IntoIter = core::slice::Iter<'a, MachineId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
