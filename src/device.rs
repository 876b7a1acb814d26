use crate::backend::{TrackerBackend, ENABLE_ONBOARD_PROCESSING_OPTION, SENDING_IMAGES_OPTION};
use crate::types::{DeviceInfo, DeviceType};
use crate::{Result, TrackerError};

/// List all devices visible to the backend.
pub fn list_devices(backend: &mut dyn TrackerBackend) -> Result<Vec<DeviceInfo>> {
    backend.enumerate_devices()
}

/// The tracking device in use. Identity is fixed once retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    info: DeviceInfo,
}

impl Device {
    /// Enumerate and keep the last discovered device.
    ///
    /// With `allow_simulator` false, a simulator device is treated as unknown.
    pub fn retrieve_last(backend: &mut dyn TrackerBackend, allow_simulator: bool) -> Result<Device> {
        let info = backend
            .enumerate_devices()?
            .last()
            .copied()
            .ok_or(TrackerError::NoDevice)?;

        match info.device_type {
            DeviceType::Unknown(raw) => return Err(TrackerError::UnknownDevice(raw)),
            DeviceType::Simulator if !allow_simulator => {
                log::error!("Simulator device found but simulators are not allowed");
                return Err(TrackerError::UnknownDevice(info.device_type.raw()));
            }
            _ => {}
        }

        log::info!(
            "Detected one {} with serial number 0x{:016x}",
            info.device_type.label(),
            info.serial_number
        );

        Ok(Device { info })
    }

    pub fn serial_number(&self) -> u64 {
        self.info.serial_number
    }

    pub fn device_type(&self) -> DeviceType {
        self.info.device_type
    }

    pub fn info(&self) -> DeviceInfo {
        self.info
    }

    /// Process images on the device itself (spryTrack).
    pub fn set_onboard_processing(&self, backend: &mut dyn TrackerBackend, enable: bool) -> Result<()> {
        backend
            .set_int32(self.info.serial_number, ENABLE_ONBOARD_PROCESSING_OPTION, enable as i32)
            .inspect_err(|e| log::warn!("Cannot set onboard processing to {}: {}", enable, e))
    }

    /// Stream raw images to the host. Disabled so a spryTrack works over USB2.
    pub fn set_sending_images(&self, backend: &mut dyn TrackerBackend, enable: bool) -> Result<()> {
        backend
            .set_int32(self.info.serial_number, SENDING_IMAGES_OPTION, enable as i32)
            .inspect_err(|e| log::warn!("Cannot set image sending to {}: {}", enable, e))
    }
}
