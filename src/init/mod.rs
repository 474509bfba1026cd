// SPDX-License-Identifier: Apache-2.0

pub mod args;
mod parse;

pub use args::OTLPExporterArgs;
