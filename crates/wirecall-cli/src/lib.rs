// Copyright 2025 Wirecall Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Wirecall CLI
//!
//! Command-line host and caller for Wirecall services.
//!
//! ## Key Commands
//!
//! - `wirecall serve`: Host the built-in `echo` service until Ctrl-C
//! - `wirecall call`: Call an `echo` method and print the JSON result
//!   (no log output, for scripting)

pub mod call;
pub mod echo;
