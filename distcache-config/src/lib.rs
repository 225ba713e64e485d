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

pub mod publishing;
pub mod serde_utils;

use distcache_error::{Error, ResultExt};
use serde::de::DeserializeOwned;

/// Parses a JSON5 document into a configuration type.
pub fn load_config<T: DeserializeOwned>(json5: &str) -> Result<T, Error> {
    serde_json5::from_str(json5).err_tip(|| "Could not parse json5 configuration")
}
