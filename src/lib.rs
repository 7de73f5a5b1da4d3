//! Translates declarative build plans into a BuildKit-compatible build
//! graph and drives a solver to produce an OCI image.
//!
//! The entry point is [`executor::build`]; [`model::Plan`] and
//! [`model::BuildConfig`] are its two inputs, [`solver::Solver`] is the
//! pluggable backend (see [`solver::BollardSolver`] for the Docker Engine
//! API-backed implementation).

pub mod assembler;
pub mod config;
pub mod context_store;
pub mod driver;
pub mod error;
pub mod executor;
pub mod graph;
pub mod image_config;
pub mod model;
pub mod pattern;
pub mod resolver;
pub mod solver;
pub mod translator;

pub use error::{Error, ErrorKind, Result};
pub use executor::{build, BuildOutput, CancelToken};
pub use model::{BuildConfig, Plan};
pub use solver::{BollardSolver, Solver};
