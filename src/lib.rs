// SPDX-License-Identifier: Apache-2.0

pub mod crypto;
pub mod export;
pub mod exporters;
pub mod init;
pub mod telemetry;
