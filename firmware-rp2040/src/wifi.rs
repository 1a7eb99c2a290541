//! CYW43 station driver.
//!
//! [`WifiTask`] owns the radio control handle and the network stack and turns
//! their state into [`NetworkEvent`]s. The lifecycle drives it through
//! [`CywWifi`], which only forwards join requests.

use crate::config::{WIFI_PASSWORD, WIFI_SSID};
use cyw43::{Control, JoinOptions};
use defmt::{info, warn};
use embassy_futures::select::{select, Either};
use embassy_net::Stack;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use gateway_core::{LinkError, NetworkEvent, NetworkEvents, WifiControl};
use portable_atomic::{AtomicBool, Ordering};

/// Join requests plus the radio readiness flag.
pub struct WifiRequests {
    join: Signal<CriticalSectionRawMutex, ()>,
    ready: AtomicBool,
}

impl WifiRequests {
    pub const fn new() -> Self {
        Self {
            join: Signal::new(),
            ready: AtomicBool::new(false),
        }
    }
}

impl Default for WifiRequests {
    fn default() -> Self {
        Self::new()
    }
}

/// [`WifiControl`] handle given to the lifecycle.
pub struct CywWifi {
    requests: &'static WifiRequests,
}

impl CywWifi {
    pub fn new(requests: &'static WifiRequests) -> Self {
        Self { requests }
    }
}

impl WifiControl for CywWifi {
    async fn connect(&mut self) -> Result<(), LinkError> {
        if !self.requests.ready.load(Ordering::Acquire) {
            return Err(LinkError::NotReady);
        }
        self.requests.join.signal(());
        Ok(())
    }
}

/// Radio side of the station.
pub struct WifiTask {
    control: Control<'static>,
    stack: Stack<'static>,
    requests: &'static WifiRequests,
    events: &'static NetworkEvents<CriticalSectionRawMutex>,
}

impl WifiTask {
    pub fn new(
        control: Control<'static>,
        stack: Stack<'static>,
        requests: &'static WifiRequests,
        events: &'static NetworkEvents<CriticalSectionRawMutex>,
    ) -> Self {
        Self {
            control,
            stack,
            requests,
            events,
        }
    }

    /// Serve join requests forever.
    ///
    /// Each request results in exactly one `Disconnected` event once the
    /// attempt fails or the link later drops.
    pub async fn run(mut self) -> ! {
        self.requests.ready.store(true, Ordering::Release);
        self.events.post(NetworkEvent::Started).await;

        loop {
            self.requests.join.wait().await;
            info!("joining {}", WIFI_SSID);

            if let Err(e) = self
                .control
                .join(WIFI_SSID, JoinOptions::new(WIFI_PASSWORD.as_bytes()))
                .await
            {
                warn!("join failed with status {}", e.status);
                self.events.post(NetworkEvent::Disconnected).await;
                continue;
            }

            self.serve_link().await;
            self.events.post(NetworkEvent::Disconnected).await;
        }
    }

    /// Report the address once DHCP is up, then wait for the link to drop.
    async fn serve_link(&mut self) {
        match select(self.stack.wait_config_up(), self.stack.wait_link_down()).await {
            Either::First(()) => {}
            Either::Second(()) => return,
        }

        if let Some(config) = self.stack.config_v4() {
            let ip = config.address.address().octets();
            self.events.post(NetworkEvent::IpAcquired(ip)).await;
        }

        self.stack.wait_link_down().await;
    }
}
