//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

#[allow(clippy::result_large_err)]
pub mod actions;
pub mod digest;
pub mod fmri;
pub mod image;
pub mod payload;
pub mod repository;
pub mod publisher;
pub mod transformer;
pub mod solver;
pub mod depend;
pub mod api;
pub mod transport;
pub mod linked;
pub mod search;
mod test_json_manifest;

#[cfg(test)]
mod publisher_tests;
