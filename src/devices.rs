//! Builds a coordinator and scan plan from configuration.

use daq_coordinator::{
    linear_points, AcquisitionPoint, CoordinationError, Coordinator, CoordinatorBuilder,
};
use daq_core::{AppResult, DaqError};
use daq_driver_mock::MockFlyerDevice;
use tracing::{debug, info};

use crate::config::{FlyscanConfig, ScanConfig};

/// Mock device for every enabled `[[devices]]` entry, in file order.
pub fn build_devices(config: &FlyscanConfig) -> Vec<MockFlyerDevice> {
    config
        .enabled_devices()
        .map(|definition| {
            debug!(
                device = %definition.id,
                role = %definition.mock.role,
                mode = ?definition.mock.mode,
                "creating mock flyer"
            );
            MockFlyerDevice::from_config(definition.id.clone(), definition.mock.clone())
        })
        .collect()
}

/// Builder holding `devices` and the `[coordinator]` section.
pub fn coordinator_builder(
    config: &FlyscanConfig,
    devices: impl IntoIterator<Item = MockFlyerDevice>,
) -> CoordinatorBuilder {
    devices.into_iter().fold(
        Coordinator::builder(config.application.name.clone())
            .config(config.coordinator.clone()),
        |builder, device| {
            let id = device.id().to_string();
            builder.add_flyer(id, device)
        },
    )
}

/// Connect every flyer of `builder`.
///
/// Session setup errors are configuration errors; device failures are
/// instrument errors.
pub async fn connect_coordinator(builder: CoordinatorBuilder) -> AppResult<Coordinator> {
    builder.connect().await.map_err(|err| match err {
        CoordinationError::Configuration(message) => DaqError::Configuration(message),
        other => DaqError::Instrument(other.to_string()),
    })
}

/// Create, connect and order every enabled device.
pub async fn build_coordinator(config: &FlyscanConfig) -> AppResult<Coordinator> {
    let devices = build_devices(config);
    info!(devices = devices.len(), "connecting flyers");
    connect_coordinator(coordinator_builder(config, devices)).await
}

/// Points of the configured scan, optionally truncated to `limit`.
pub fn scan_points(scan: &ScanConfig, limit: Option<usize>) -> Vec<AcquisitionPoint> {
    let mut points = linear_points(
        &scan.axis,
        scan.start,
        scan.stop,
        scan.num_points,
        scan.exposure_s,
        scan.triggers_per_point,
    );
    if let Some(limit) = limit {
        points.truncate(limit);
    }
    points
}
