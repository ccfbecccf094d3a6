//! # Architecture Abstraction Layer
//!
//! The machine-specific floor of the kernel. Everything above this
//! module is portable; a port supplies the first-dispatch primitive,
//! the context-switch exception, the tick exception, and the handful
//! of helpers around them. Currently implements the Cortex-M4 port.

pub mod cortex_m4;
