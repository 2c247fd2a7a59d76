// NVIDIA backend on top of nvml-wrapper
use log::{debug, info};
use nvml_wrapper::{
    Device, Nvml,
    enum_wrappers::device::{Clock, TemperatureSensor},
    error::{NvmlError, nvml_sym, nvml_try},
};
use nvml_wrapper_sys::bindings::NvmlLib;

use super::{FanMode, GpuError, GpuManagement, GpuReading, PowerConstraint};
use crate::datasource::file_path::NVML_LIBRARY;

fn backend(op: &'static str) -> impl FnOnce(NvmlError) -> GpuError {
    move |e| GpuError::Backend {
        op,
        message: e.to_string(),
    }
}

/// Holds the NVML session; device handles are looked up per call so a
/// driver reload between calls is picked up. Dropping it shuts NVML down.
///
/// The safe wrapper has no VF-offset or fan setters, so those go through a
/// second handle on the raw library.
pub struct NvmlGpu {
    nvml: Nvml,
    raw: NvmlLib,
}

impl NvmlGpu {
    pub fn init() -> Result<Self, GpuError> {
        let nvml = Nvml::init()
            .map_err(|e| GpuError::Unavailable(format!("NVML init failed: {e}")))?;
        // SAFETY: loading the vendor library runs no initializers beyond
        // what Nvml::init already triggered for the same object
        let raw = unsafe { NvmlLib::new(NVML_LIBRARY) }
            .map_err(|e| GpuError::Unavailable(format!("{NVML_LIBRARY}: {e}")))?;
        info!("NVML initialized");
        Ok(Self { nvml, raw })
    }

    fn device(&self, index: u32) -> Result<Device<'_>, GpuError> {
        self.nvml.device_by_index(index).map_err(|e| match e {
            NvmlError::InvalidArg => GpuError::NoDevice(index),
            other => backend("nvmlDeviceGetHandleByIndex")(other),
        })
    }
}

impl GpuManagement for NvmlGpu {
    fn device_count(&self) -> Result<u32, GpuError> {
        self.nvml
            .device_count()
            .map_err(backend("nvmlDeviceGetCount"))
    }

    fn device_name(&self, index: u32) -> Result<String, GpuError> {
        self.device(index)?
            .name()
            .map_err(backend("nvmlDeviceGetName"))
    }

    fn device_bus_id(&self, index: u32) -> Result<String, GpuError> {
        self.device(index)?
            .pci_info()
            .map(|pci| pci.bus_id)
            .map_err(backend("nvmlDeviceGetPciInfo"))
    }

    fn clocks_and_temp(&self, index: u32) -> Result<GpuReading, GpuError> {
        let device = self.device(index)?;
        Ok(GpuReading {
            core_clock_mhz: device
                .clock_info(Clock::Graphics)
                .map_err(backend("nvmlDeviceGetClockInfo(graphics)"))?,
            mem_clock_mhz: device
                .clock_info(Clock::Memory)
                .map_err(backend("nvmlDeviceGetClockInfo(memory)"))?,
            temperature_c: device
                .temperature(TemperatureSensor::Gpu)
                .map_err(backend("nvmlDeviceGetTemperature"))?,
        })
    }

    fn power_constraints(&self, index: u32) -> Result<PowerConstraint, GpuError> {
        let constraints = self
            .device(index)?
            .power_management_limit_constraints()
            .map_err(backend("nvmlDeviceGetPowerManagementLimitConstraints"))?;
        Ok(PowerConstraint {
            min_mw: constraints.min_limit,
            max_mw: constraints.max_limit,
        })
    }

    fn default_power_limit(&self, index: u32) -> Result<u32, GpuError> {
        self.device(index)?
            .power_management_limit_default()
            .map_err(backend("nvmlDeviceGetPowerManagementDefaultLimit"))
    }

    fn set_core_offset(&self, index: u32, offset_mhz: i32) -> Result<(), GpuError> {
        const OP: &str = "nvmlDeviceSetGpcClkVfOffset";
        let device = self.device(index)?;
        debug!("GPU {index}: graphics VF offset {offset_mhz}");
        // SAFETY: the handle comes from a live Device borrowed from self.nvml
        // and both libraries resolve to the same loaded object
        unsafe {
            let sym = nvml_sym(self.raw.nvmlDeviceSetGpcClkVfOffset.as_ref())
                .map_err(backend(OP))?;
            nvml_try(sym(device.handle(), offset_mhz))
                .map_err(backend(OP))
        }
    }

    fn set_mem_offset(&self, index: u32, offset: i32) -> Result<(), GpuError> {
        const OP: &str = "nvmlDeviceSetMemClkVfOffset";
        let device = self.device(index)?;
        debug!("GPU {index}: memory VF offset {offset}");
        // SAFETY: see set_core_offset
        unsafe {
            let sym = nvml_sym(self.raw.nvmlDeviceSetMemClkVfOffset.as_ref())
                .map_err(backend(OP))?;
            nvml_try(sym(device.handle(), offset)).map_err(backend(OP))
        }
    }

    fn set_power_limit(&self, index: u32, limit_mw: u32) -> Result<(), GpuError> {
        let mut device = self.device(index)?;
        debug!("GPU {index}: power limit {limit_mw} mW");
        device
            .set_power_management_limit(limit_mw)
            .map_err(backend("nvmlDeviceSetPowerManagementLimit"))
    }

    fn set_fan(&self, index: u32, mode: FanMode) -> Result<(), GpuError> {
        const SET_DEFAULT: &str = "nvmlDeviceSetDefaultFanSpeed_v2";
        const SET_SPEED: &str = "nvmlDeviceSetFanSpeed_v2";
        let device = self.device(index)?;
        let fans = device.num_fans().map_err(backend("nvmlDeviceGetNumFans"))?;
        debug!("GPU {index}: fan {mode:?} on {fans} fan(s)");
        for fan in 0..fans {
            // SAFETY: see set_core_offset
            unsafe {
                match mode {
                    FanMode::Default => {
                        let sym = nvml_sym(self.raw.nvmlDeviceSetDefaultFanSpeed_v2.as_ref())
                            .map_err(backend(SET_DEFAULT))?;
                        nvml_try(sym(device.handle(), fan))
                            .map_err(backend(SET_DEFAULT))?;
                    }
                    FanMode::Manual(percent) => {
                        let sym = nvml_sym(self.raw.nvmlDeviceSetFanSpeed_v2.as_ref())
                            .map_err(backend(SET_SPEED))?;
                        nvml_try(sym(device.handle(), fan, u32::from(percent)))
                            .map_err(backend(SET_SPEED))?;
                    }
                }
            }
        }
        Ok(())
    }
}
