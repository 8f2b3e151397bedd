//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]
#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod debug;
pub mod error;
pub mod events;
pub mod instance;
pub mod kernel;
pub mod mrt;
pub mod nexthop;
pub mod rep;
pub mod tasks;
pub mod vif;
