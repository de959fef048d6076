use axerrno::{ax_err, AxResult};

/// Interrupt layout of one flink device, as discovered by its bus backend
/// (device tree properties or hard-coded values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceConfig {
    /// Number of interrupt lines the FPGA design exposes.
    pub nof_irqs: u32,
    /// Hardware interrupt number of line 0.
    pub irq_offset: u32,
    /// Notification number handed out for line 0.
    pub signal_offset: u32,
}

impl DeviceConfig {
    /// Creates a configuration with `nof_irqs` lines.
    pub const fn new(nof_irqs: u32, irq_offset: u32, signal_offset: u32) -> Self {
        Self {
            nof_irqs,
            irq_offset,
            signal_offset,
        }
    }

    /// A device that exposes no interrupt lines.
    pub const fn without_irqs() -> Self {
        Self::new(0, 0, 0)
    }

    /// Checks that every line's hardware and notification numbers fit in
    /// 32 bits.
    pub fn validate(&self) -> AxResult {
        let last = match self.nof_irqs.checked_sub(1) {
            Some(last) => last,
            None => return Ok(()),
        };
        if self.irq_offset.checked_add(last).is_none() {
            return ax_err!(InvalidInput, "interrupt lines overflow the hardware IRQ space");
        }
        if self.signal_offset.checked_add(last).is_none() {
            return ax_err!(InvalidInput, "interrupt lines overflow the notification space");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axerrno::AxError;

    #[test]
    fn test_config_validate() {
        assert!(DeviceConfig::without_irqs().validate().is_ok());
        assert!(DeviceConfig::new(30, 55, 34).validate().is_ok());
        assert!(DeviceConfig::new(1, u32::MAX, 0).validate().is_ok());
        assert_eq!(
            DeviceConfig::new(2, u32::MAX, 0).validate(),
            Err(AxError::InvalidInput)
        );
        assert_eq!(
            DeviceConfig::new(4, 0, u32::MAX - 2).validate(),
            Err(AxError::InvalidInput)
        );
    }
}
