//! UART byte source for the serial line reader.
//!
//! # Pins
//!
//! Uses UART1:
//! - GPIO 8: TX (unused)
//! - GPIO 9: RX

use embassy_rp::uart::{Async, Error as UartError, UartRx};
use embassy_time::{with_timeout, Duration};
use gateway_core::config::READ_TIMEOUT_MS;
use gateway_core::{SerialError, SerialPort};

/// Helper instead of a `From` impl: both types live in external crates.
#[inline]
fn uart_error_to_serial_error(e: UartError) -> SerialError {
    match e {
        UartError::Framing => SerialError::Framing,
        UartError::Overrun => SerialError::Overrun,
        UartError::Break => SerialError::Break,
        _ => SerialError::Io,
    }
}

/// [`SerialPort`] over an async UART receiver.
pub struct UartSerialPort<'d> {
    rx: UartRx<'d, Async>,
}

impl<'d> UartSerialPort<'d> {
    #[must_use]
    pub fn new(rx: UartRx<'d, Async>) -> Self {
        Self { rx }
    }
}

impl SerialPort for UartSerialPort<'_> {
    async fn read_byte(&mut self) -> Result<Option<u8>, SerialError> {
        let mut byte = [0u8; 1];
        match with_timeout(
            Duration::from_millis(READ_TIMEOUT_MS),
            self.rx.read(&mut byte),
        )
        .await
        {
            Ok(Ok(())) => Ok(Some(byte[0])),
            Ok(Err(e)) => Err(uart_error_to_serial_error(e)),
            Err(_timeout) => Ok(None),
        }
    }
}
