//! USB transport abstraction
//!
//! Everything the protocol core does to the bus goes through
//! [`UsbTransport`]. The hardware implementation lives in [`usb`]; the
//! in-memory adapter in [`crate::emulator`] implements the same trait.

use std::time::Duration;

use crate::error::Result;
use crate::protocol::ControlSetup;

/// Blocking USB operations needed by the SF100 protocol
///
/// Every transfer takes an explicit deadline. A transfer that misses it
/// fails with [`crate::Sf100Error::Timeout`] and is not retried.
pub trait UsbTransport {
    /// Open the device, select `configuration` and claim `interface`
    ///
    /// On failure anything already acquired is released again.
    fn claim(&mut self, configuration: u8, interface: u8) -> Result<()>;

    /// Control transfer device-to-host, returns the number of bytes read
    fn control_in(
        &mut self,
        setup: ControlSetup,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Control transfer host-to-device, returns the number of bytes written
    fn control_out(
        &mut self,
        setup: ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Bulk IN transfer, returns the number of bytes read
    fn bulk_in(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Release a claimed interface
    fn release_interface(&mut self, interface: u8) -> Result<()>;

    /// Close the device handle
    fn close(&mut self) -> Result<()>;
}

impl<T: UsbTransport + ?Sized> UsbTransport for &mut T {
    fn claim(&mut self, configuration: u8, interface: u8) -> Result<()> {
        (**self).claim(configuration, interface)
    }

    fn control_in(
        &mut self,
        setup: ControlSetup,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        (**self).control_in(setup, buf, timeout)
    }

    fn control_out(
        &mut self,
        setup: ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        (**self).control_out(setup, data, timeout)
    }

    fn bulk_in(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).bulk_in(endpoint, buf, timeout)
    }

    fn release_interface(&mut self, interface: u8) -> Result<()> {
        (**self).release_interface(interface)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

#[cfg(feature = "nusb")]
pub mod usb {
    //! nusb-backed transport

    use super::*;
    use crate::error::Sf100Error;
    use nusb::transfer::{Buffer, Bulk, ControlIn, ControlOut, ControlType, In, Recipient};
    use nusb::{Device, DeviceInfo, Endpoint, Interface, MaybeFuture};

    /// Transport over a real USB device
    pub struct NusbTransport {
        info: DeviceInfo,
        device: Option<Device>,
        interface: Option<Interface>,
        bulk_in: Option<(u8, Endpoint<Bulk, In>)>,
    }

    impl NusbTransport {
        /// Wrap an enumerated device; nothing is opened until [`UsbTransport::claim`]
        pub fn new(info: DeviceInfo) -> Self {
            Self {
                info,
                device: None,
                interface: None,
                bulk_in: None,
            }
        }

        /// The enumerated device this transport talks to
        pub fn info(&self) -> &DeviceInfo {
            &self.info
        }

        fn interface(&self) -> Result<&Interface> {
            self.interface
                .as_ref()
                .ok_or_else(|| Sf100Error::Transfer("interface not claimed".to_string()))
        }

        fn bulk_endpoint(&mut self, endpoint: u8) -> Result<&mut Endpoint<Bulk, In>> {
            let cached = matches!(self.bulk_in, Some((ep, _)) if ep == endpoint);
            if !cached {
                let ep = self
                    .interface()?
                    .endpoint::<Bulk, In>(endpoint)
                    .map_err(|e| Sf100Error::Transfer(e.to_string()))?;
                self.bulk_in = Some((endpoint, ep));
            }
            match self.bulk_in.as_mut() {
                Some((_, ep)) => Ok(ep),
                None => Err(Sf100Error::Transfer("bulk endpoint unavailable".to_string())),
            }
        }
    }

    /// Split bmRequestType into nusb's control type and recipient
    fn control_kind(request_type: u8) -> (ControlType, Recipient) {
        let control_type = match (request_type >> 5) & 0x03 {
            0 => ControlType::Standard,
            1 => ControlType::Class,
            _ => ControlType::Vendor,
        };
        let recipient = match request_type & 0x1f {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            _ => Recipient::Other,
        };
        (control_type, recipient)
    }

    impl UsbTransport for NusbTransport {
        fn claim(&mut self, configuration: u8, interface: u8) -> Result<()> {
            log::info!(
                "Opening SF100 at bus {} address {}",
                self.info.busnum(),
                self.info.device_address()
            );

            // Each early return drops what was acquired so far
            let device = self
                .info
                .open()
                .wait()
                .map_err(|e| Sf100Error::ClaimFailed(format!("open: {}", e)))?;
            device
                .set_configuration(configuration)
                .wait()
                .map_err(|e| Sf100Error::ClaimFailed(format!("set configuration: {}", e)))?;
            let claimed = device
                .claim_interface(interface)
                .wait()
                .map_err(|e| Sf100Error::ClaimFailed(format!("claim interface: {}", e)))?;

            self.device = Some(device);
            self.interface = Some(claimed);
            Ok(())
        }

        fn control_in(
            &mut self,
            setup: ControlSetup,
            buf: &mut [u8],
            timeout: Duration,
        ) -> Result<usize> {
            let (control_type, recipient) = control_kind(setup.request_type);
            let data = self
                .interface()?
                .control_in(
                    ControlIn {
                        control_type,
                        recipient,
                        request: setup.request,
                        value: setup.value,
                        index: setup.index,
                        length: buf.len() as u16,
                    },
                    timeout,
                )
                .wait()?;

            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok(len)
        }

        fn control_out(
            &mut self,
            setup: ControlSetup,
            data: &[u8],
            timeout: Duration,
        ) -> Result<usize> {
            let (control_type, recipient) = control_kind(setup.request_type);
            self.interface()?
                .control_out(
                    ControlOut {
                        control_type,
                        recipient,
                        request: setup.request,
                        value: setup.value,
                        index: setup.index,
                        data,
                    },
                    timeout,
                )
                .wait()?;

            // nusb only completes a control OUT once the whole data stage went through
            Ok(data.len())
        }

        fn bulk_in(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize> {
            let ep = self.bulk_endpoint(endpoint)?;

            let max_packet_size = ep.max_packet_size();
            let request_len = buf.len().div_ceil(max_packet_size) * max_packet_size;
            let mut in_buf = Buffer::new(request_len);
            in_buf.set_requested_len(request_len);
            ep.submit(in_buf);

            let Some(completion) = ep.wait_next_complete(timeout) else {
                ep.cancel_all();
                while ep.pending() > 0 {
                    let _ = ep.wait_next_complete(Duration::from_secs(1));
                }
                return Err(Sf100Error::Timeout);
            };
            completion.status?;

            let len = completion.actual_len.min(buf.len());
            buf[..len].copy_from_slice(&completion.buffer[..len]);
            Ok(len)
        }

        fn release_interface(&mut self, interface: u8) -> Result<()> {
            self.bulk_in = None;
            match self.interface.take() {
                Some(claimed) => {
                    log::debug!("Releasing interface {}", interface);
                    drop(claimed);
                    Ok(())
                }
                None => Err(Sf100Error::Transfer(format!(
                    "interface {} not claimed",
                    interface
                ))),
            }
        }

        fn close(&mut self) -> Result<()> {
            self.bulk_in = None;
            self.interface = None;
            match self.device.take() {
                Some(device) => {
                    drop(device);
                    Ok(())
                }
                None => Err(Sf100Error::Transfer("device not open".to_string())),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_control_kind() {
            assert!(matches!(
                control_kind(0x42),
                (ControlType::Vendor, Recipient::Endpoint)
            ));
            assert!(matches!(
                control_kind(0xc3),
                (ControlType::Vendor, Recipient::Other)
            ));
            assert!(matches!(
                control_kind(0x21),
                (ControlType::Class, Recipient::Interface)
            ));
        }
    }
}
