//! Finding SF100 adapters on the bus

use std::fmt;

use crate::error::{Result, Sf100Error};
use crate::protocol::{SF100_USB_PRODUCT, SF100_USB_VENDOR};

/// Vendor and product ID of an enumerated USB device
pub trait UsbIds {
    fn vendor_id(&self) -> u16;
    fn product_id(&self) -> u16;
}

impl<D: UsbIds + ?Sized> UsbIds for &D {
    fn vendor_id(&self) -> u16 {
        (**self).vendor_id()
    }

    fn product_id(&self) -> u16 {
        (**self).product_id()
    }
}

/// Does this device carry the SF100 VID/PID?
pub fn is_sf100<D: UsbIds + ?Sized>(device: &D) -> bool {
    device.vendor_id() == SF100_USB_VENDOR && device.product_id() == SF100_USB_PRODUCT
}

/// Pick the `index`th SF100 among `devices`, in enumeration order
pub fn find_device<D, I>(devices: I, index: usize) -> Result<D>
where
    D: UsbIds,
    I: IntoIterator<Item = D>,
{
    devices
        .into_iter()
        .filter(|d| is_sf100(d))
        .nth(index)
        .ok_or(Sf100Error::DeviceNotFound)
}

/// Information about a connected SF100
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sf100DeviceInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
}

impl fmt::Display for Sf100DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SF100 (bus {} address {})", self.bus, self.address)
    }
}

#[cfg(feature = "nusb")]
mod usb {
    use nusb::{DeviceInfo, MaybeFuture};

    use super::*;
    use crate::transport::usb::NusbTransport;

    impl UsbIds for DeviceInfo {
        fn vendor_id(&self) -> u16 {
            DeviceInfo::vendor_id(self)
        }

        fn product_id(&self) -> u16 {
            DeviceInfo::product_id(self)
        }
    }

    fn enumerate() -> Result<Vec<DeviceInfo>> {
        let devices = nusb::list_devices().wait()?;
        Ok(devices.collect())
    }

    /// List all connected SF100 adapters
    pub fn list_devices() -> Result<Vec<Sf100DeviceInfo>> {
        Ok(enumerate()?
            .iter()
            .filter(|d| is_sf100(*d))
            .map(|d| Sf100DeviceInfo {
                bus: d.busnum(),
                address: d.device_address(),
            })
            .collect())
    }

    /// Transport for the `index`th SF100; the device is not opened yet
    pub fn open_transport(index: usize) -> Result<NusbTransport> {
        let info = find_device(enumerate()?, index)?;
        log::debug!(
            "Selected SF100 #{} at bus {} address {}",
            index,
            info.busnum(),
            info.device_address()
        );
        Ok(NusbTransport::new(info))
    }
}

#[cfg(feature = "nusb")]
pub use usb::{list_devices, open_transport};
