//! Simulated devices and media for the call orchestrator
//!
//! Provides a [`SimulatedNetwork`] connector whose devices answer requests
//! like real ones, and a [`SimulatedMedia`] stack, for testing and for
//! running the console without a server.

pub mod device;
pub mod device_task;
pub mod media;
pub mod network;

pub use device::{SimCall, SimDevice, SimDeviceConfig, StartBehavior};
pub use device_task::{run_sim_device, RequestLog, SimCommand};
pub use media::{MediaEvent, SimAnalyser, SimMediaConfig, SimulatedMedia};
pub use network::{SimControl, SimError, SimulatedNetwork};
