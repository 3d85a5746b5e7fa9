//! Serial ground console.
//!
//! Line-oriented: `arm`, `disarm`, `query`, newline terminated. This is the
//! whole ground interface; commands are relayed to the control task so the
//! console never touches flight state directly.

use apogee_core::command::{GroundCommand, GroundResponse};
use core::fmt::Write;
use embassy_time::{Duration, with_timeout};
use esp_hal::Async;
use esp_hal::uart::Uart;
use heapless::{String, Vec};
use log::info;

use crate::tasks::{CMD_CHANNEL, RESP_CHANNEL};

const BACKSPACE: u8 = 0x08;

#[embassy_executor::task]
pub async fn console_task(mut uart: Uart<'static, Async>) -> ! {
    info!("ground console ready");
    let mut rx_buf = [0u8; 64];
    let mut line = Vec::<u8, 64>::new();

    loop {
        let Ok(n) = uart.read_async(&mut rx_buf).await else {
            continue;
        };

        for &byte in &rx_buf[..n] {
            match byte {
                b'\n' | b'\r' => {
                    if !line.is_empty() {
                        handle_line(&mut uart, line.as_slice()).await;
                        line.clear();
                    }
                }
                BACKSPACE => {
                    line.pop();
                }
                _ => {
                    if line.push(byte).is_err() {
                        let _ = uart.write_async(b"\r\nline too long\r\n").await;
                        line.clear();
                    }
                }
            }
        }
        // Echo so the operator's terminal shows the keystrokes.
        let _ = uart.write_async(&rx_buf[..n]).await;
    }
}

async fn handle_line(uart: &mut Uart<'static, Async>, line: &[u8]) {
    let command = match line {
        b"arm" => GroundCommand::Arm,
        b"disarm" => GroundCommand::Disarm,
        b"query" => GroundCommand::Query,
        _ => {
            let _ = uart.write_async(b"\r\nunknown command\r\n").await;
            return;
        }
    };

    CMD_CHANNEL.send(command).await;

    // The control loop answers within a tick; a missing answer means the
    // control task is wedged, which the operator needs to see.
    let response = with_timeout(Duration::from_millis(250), RESP_CHANNEL.receive()).await;
    let mut out: String<256> = String::new();
    match response {
        Ok(GroundResponse::Armed) => {
            let _ = write!(out, "\r\narmed\r\n");
        }
        Ok(GroundResponse::Disarmed) => {
            let _ = write!(out, "\r\ndisarmed\r\n");
        }
        Ok(GroundResponse::Rejected(reason)) => {
            let _ = write!(out, "\r\nrejected: {:?}\r\n", reason);
        }
        Ok(GroundResponse::Snapshot(snapshot)) => {
            let _ = write!(
                out,
                "\r\nphase {} max_alt {:.1}m\r\n",
                snapshot.phase.label(),
                snapshot.max_altitude_m
            );
            for ch in &snapshot.channels {
                let _ = write!(
                    out,
                    "  {}: armed={} cont={} fired={}\r\n",
                    ch.id.label(),
                    ch.armed,
                    ch.continuity,
                    ch.fired
                );
            }
        }
        Err(_) => {
            let _ = write!(out, "\r\nno response from control loop\r\n");
        }
    }
    let _ = uart.write_async(out.as_bytes()).await;
}
