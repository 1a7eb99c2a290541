#![no_std]
#![no_main]

use core::mem::MaybeUninit;
use cyw43_pio::{PioSpi, DEFAULT_CLOCK_DIVIDER};
use defmt::info;
use defmt_rtt as _;
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_net::StackResources;
use embassy_rp::bind_interrupts;
use embassy_rp::clocks::RoscRng;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::interrupt;
use embassy_rp::interrupt::{InterruptExt, Priority};
use embassy_rp::peripherals::{DMA_CH0, PIO0, UART1};
use embassy_rp::pio::{InterruptHandler as PioInterruptHandler, Pio};
use embassy_rp::uart::{Config as UartConfig, Uart};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Timer;
use embedded_alloc::LlffHeap as Heap;
use rand_core::RngCore;
use sensor_gateway_rp2040::config::{HEAP_SIZE, STATS_INTERVAL, UART_BAUD_RATE};
use sensor_gateway_rp2040::{
    BrokerLink, CywWifi, GatewayStats, MessageQueue, MqttChannels, MqttConnector, MqttSession,
    MqttTask, NetworkEvents, NetworkLifecycle, Publisher, RawLineQueue, RecordValidator,
    SerialLineReader, TruncationPolicy, UartSerialPort, WifiRequests, WifiTask,
};
use static_cell::StaticCell;

#[cfg(feature = "dev-panic")]
use panic_probe as _;
#[cfg(feature = "prod-panic")]
use panic_reset as _;

/// Queues and the session gate cross executors.
type Shared = CriticalSectionRawMutex;

type Reader = SerialLineReader<'static, UartSerialPort<'static>, Shared>;
type Lifecycle = NetworkLifecycle<'static, Shared, CywWifi, MqttConnector>;

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => PioInterruptHandler<PIO0>;
    UART1_IRQ => embassy_rp::uart::InterruptHandler<UART1>;
});

#[global_allocator]
static HEAP: Heap = Heap::empty();

/// Serial ingestion runs above validation, which runs above everything on
/// the thread executor.
static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();
static EXECUTOR_MEDIUM: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn SWI_IRQ_1() {
    EXECUTOR_HIGH.on_interrupt()
}

#[interrupt]
unsafe fn SWI_IRQ_0() {
    EXECUTOR_MEDIUM.on_interrupt()
}

static RAW_LINES: StaticCell<RawLineQueue<Shared>> = StaticCell::new();
static MESSAGES: StaticCell<MessageQueue<Shared>> = StaticCell::new();
static STATS: StaticCell<GatewayStats> = StaticCell::new();
static BROKER_LINK: StaticCell<BrokerLink<Shared, MqttSession>> = StaticCell::new();
static NETWORK_EVENTS: StaticCell<NetworkEvents<Shared>> = StaticCell::new();
static WIFI_REQUESTS: StaticCell<WifiRequests> = StaticCell::new();
static MQTT_CHANNELS: StaticCell<MqttChannels> = StaticCell::new();

static CYW43_STATE: StaticCell<cyw43::State> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();

fn init_heap() {
    static mut HEAP_MEM: [MaybeUninit<u8>; HEAP_SIZE] = [MaybeUninit::uninit(); HEAP_SIZE];
    // SAFETY: runs once, before anything allocates.
    unsafe { HEAP.init(core::ptr::addr_of_mut!(HEAP_MEM) as usize, HEAP_SIZE) }
}

fn truncation_policy() -> TruncationPolicy {
    if cfg!(feature = "discard-truncated") {
        TruncationPolicy::Discard
    } else {
        TruncationPolicy::Forward
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    init_heap();
    info!("sensor gateway starting...");

    let p = embassy_rp::init(embassy_rp::config::Config::default());

    let raw_lines = RAW_LINES.init(RawLineQueue::new());
    let messages = MESSAGES.init(MessageQueue::new());
    let stats = STATS.init(GatewayStats::new());
    let link = BROKER_LINK.init(BrokerLink::new());
    let events = NETWORK_EVENTS.init(NetworkEvents::new());
    let wifi_requests = WIFI_REQUESTS.init(WifiRequests::new());
    let mqtt_channels = MQTT_CHANNELS.init(MqttChannels::new());

    // --- UART Setup ---
    let mut uart_config = UartConfig::default();
    uart_config.baudrate = UART_BAUD_RATE;

    let uart = Uart::new(
        p.UART1,
        p.PIN_8, // TX
        p.PIN_9, // RX
        Irqs,
        p.DMA_CH1,
        p.DMA_CH2,
        uart_config,
    );
    let (_tx, rx) = uart.split();
    let reader = SerialLineReader::with_policy(
        UartSerialPort::new(rx),
        raw_lines,
        stats,
        truncation_policy(),
    );

    // --- Radio Setup ---
    // Blobs from embassy-rs/embassy, cyw43-firmware/
    let fw = include_bytes!("../../cyw43-firmware/43439A0.bin");
    let clm = include_bytes!("../../cyw43-firmware/43439A0_clm.bin");

    let pwr = Output::new(p.PIN_23, Level::Low);
    let cs = Output::new(p.PIN_25, Level::High);
    let mut pio = Pio::new(p.PIO0, Irqs);
    let spi = PioSpi::new(
        &mut pio.common,
        pio.sm0,
        DEFAULT_CLOCK_DIVIDER,
        pio.irq0,
        cs,
        p.PIN_24,
        p.PIN_29,
        p.DMA_CH0,
    );

    let state = CYW43_STATE.init(cyw43::State::new());
    let (net_device, mut control, runner) = cyw43::new(state, pwr, spi, fw).await;
    spawner.spawn(cyw43_task(runner).unwrap());

    control.init(clm).await;
    control
        .set_power_management(cyw43::PowerManagementMode::PowerSave)
        .await;

    let seed = RoscRng.next_u64();
    let (stack, net_runner) = embassy_net::new(
        net_device,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );
    spawner.spawn(net_task(net_runner).unwrap());

    // --- Pipeline ---
    interrupt::SWI_IRQ_1.set_priority(Priority::P2);
    let high = EXECUTOR_HIGH.start(interrupt::SWI_IRQ_1);
    high.spawn(reader_task(reader).unwrap());

    interrupt::SWI_IRQ_0.set_priority(Priority::P3);
    let medium = EXECUTOR_MEDIUM.start(interrupt::SWI_IRQ_0);
    medium.spawn(validator_task(RecordValidator::new(raw_lines, messages, stats)).unwrap());

    spawner.spawn(publisher_task(Publisher::new(messages, link, stats)).unwrap());

    // --- Network ---
    let lifecycle = NetworkLifecycle::new(
        events,
        link,
        CywWifi::new(wifi_requests),
        MqttConnector::new(mqtt_channels),
        stats,
    );
    spawner.spawn(lifecycle_task(lifecycle).unwrap());
    spawner.spawn(mqtt_task(MqttTask::new(stack, mqtt_channels, events)).unwrap());
    spawner.spawn(wifi_task(WifiTask::new(control, stack, wifi_requests, events)).unwrap());

    spawner.spawn(stats_task(stats).unwrap());

    info!("sensor gateway initialized, waiting for data...");
}

/// Radio driver task - services the CYW43 bus.
#[embassy_executor::task]
async fn cyw43_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

/// Network stack task - runs DHCP and TCP.
#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn reader_task(mut reader: Reader) -> ! {
    reader.run().await
}

#[embassy_executor::task]
async fn validator_task(mut validator: RecordValidator<'static, Shared>) -> ! {
    validator.run().await
}

#[embassy_executor::task]
async fn publisher_task(mut publisher: Publisher<'static, Shared, MqttSession>) -> ! {
    publisher.run().await
}

/// Lifecycle task - sole owner of the network and broker session state.
#[embassy_executor::task]
async fn lifecycle_task(mut lifecycle: Lifecycle) -> ! {
    lifecycle.run().await
}

#[embassy_executor::task]
async fn mqtt_task(task: MqttTask) -> ! {
    task.run().await
}

#[embassy_executor::task]
async fn wifi_task(task: WifiTask) -> ! {
    task.run().await
}

/// Stats task - logs pipeline counters periodically.
#[embassy_executor::task]
async fn stats_task(stats: &'static GatewayStats) -> ! {
    loop {
        Timer::after(STATS_INTERVAL).await;
        info!("stats: {}", stats.snapshot());
    }
}
