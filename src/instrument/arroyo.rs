//! Arroyo 4300-series laser diode driver
//!
//! USB-serial SCPI dialect. Settings follow the vendor manual: 38400 baud,
//! 8N1, `\n` terminated commands.
//!
//! A background watchdog polls `LASER:EVENT?` and latches an error flag when
//! the driver reports a limit, interlock, open-circuit or short. Long-running
//! loops such as the P-I-V sweep check [`LaserDriver::has_error`] between
//! steps. All instrument I/O, the watchdog's included, goes through one
//! `tokio::sync::Mutex` so queries never interleave.
//!
//! Temperature and TEC settings are not managed here; the driver must be
//! preset not to trip its output when the TEC is off.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument as _};

use super::{share, SharedTransport};
use crate::adapters::{ScpiTransport, SessionSettings};
use crate::config::{LaserConfig, ToolsConfig};
use crate::error::{AppResult, ToolsError};
use crate::hardware::ResourceManager;
use crate::interact::{resolve_resource, Prompt, ResolveOptions};
use crate::scpi;

/// Role the resource is cached under
pub const ROLE: &str = "LaserDriver";

/// Output On bit of the laser condition register
const OUTPUT_ON_BIT: u32 = 10;

/// Delay between `LASER:COND?` polls while waiting for the output to follow
const CONDITION_POLL: Duration = Duration::from_millis(20);

/// Fault bits of the laser event register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaserFault {
    CurrentLimit,
    VoltageLimit,
    InterlockError,
    OpenCircuit,
    OutputShorted,
}

impl LaserFault {
    pub const ALL: [LaserFault; 5] = [
        LaserFault::CurrentLimit,
        LaserFault::VoltageLimit,
        LaserFault::InterlockError,
        LaserFault::OpenCircuit,
        LaserFault::OutputShorted,
    ];

    pub fn bit(self) -> u32 {
        match self {
            LaserFault::CurrentLimit => 0,
            LaserFault::VoltageLimit => 1,
            LaserFault::InterlockError => 4,
            LaserFault::OpenCircuit => 7,
            LaserFault::OutputShorted => 8,
        }
    }

    /// Faults flagged in an event register value, lowest bit first
    pub fn decode(register: u32) -> Vec<LaserFault> {
        Self::ALL
            .into_iter()
            .filter(|fault| register & (1 << fault.bit()) != 0)
            .collect()
    }
}

impl fmt::Display for LaserFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LaserFault::CurrentLimit => "Current Limit",
            LaserFault::VoltageLimit => "Voltage Limit",
            LaserFault::InterlockError => "Interlock Error",
            LaserFault::OpenCircuit => "Open Circuit",
            LaserFault::OutputShorted => "Output Shorted",
        })
    }
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct LaserOptions {
    /// Resource string; resolved interactively when `None`
    pub resource: Option<String>,
    /// Forward current limit to apply after connecting, mA
    pub io_max: Option<f64>,
    /// Forward voltage limit to apply after connecting, V
    pub vf_max: Option<f64>,
    pub laser: LaserConfig,
    pub resolve: ResolveOptions,
}

impl Default for LaserOptions {
    fn default() -> Self {
        Self {
            resource: None,
            io_max: None,
            vf_max: None,
            laser: LaserConfig::default(),
            resolve: ResolveOptions::new(ROLE),
        }
    }
}

impl LaserOptions {
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            laser: config.laser.clone(),
            resolve: ResolveOptions::from_config(config, ROLE),
            ..Self::default()
        }
    }
}

pub struct LaserDriver {
    resource: String,
    idn: String,
    transport: SharedTransport,
    error: Arc<AtomicBool>,
    faults: Arc<StdMutex<Vec<LaserFault>>>,
    watchdog: Option<JoinHandle<()>>,
    output_timeout: Duration,
    closed: bool,
}

impl LaserDriver {
    /// Resolve, open and identify the driver, then start the watchdog.
    pub async fn connect(
        rm: &ResourceManager,
        prompt: &mut dyn Prompt,
        options: LaserOptions,
    ) -> AppResult<Self> {
        let resource = match options.resource {
            Some(resource) => resource,
            None => {
                prompt.message("Connecting to Laser Driver:")?;
                resolve_resource(rm, prompt, &options.resolve).await?
            }
        };

        let settings = SessionSettings::default()
            .with_baud_rate(options.laser.baud_rate)
            .with_timeout(options.laser.timeout());
        let mut transport = rm.open(&resource, &settings).await?;

        // The first query after power-up regularly fails; the second works.
        let idn = match scpi::identify(&mut *transport).await {
            Ok(idn) => idn,
            Err(e) => {
                debug!("First *IDN? on {} failed: {}", resource, e);
                let idn = scpi::identify(&mut *transport).await?;
                prompt.message(
                    "\nClear any errors that appear on the Laser Driver Screen and disregard!!!!",
                )?;
                idn
            }
        };
        prompt.message(&format!("Successfully connected to {}", idn))?;

        let driver = Self::from_transport(resource, idn, transport, &options.laser);
        if let Some(io_max) = options.io_max {
            driver.set_current_limit(io_max, Some(&mut *prompt)).await?;
        }
        if let Some(vf_max) = options.vf_max {
            driver.set_voltage_limit(vf_max, Some(&mut *prompt)).await?;
        }
        Ok(driver)
    }

    /// Wrap an already identified transport and start the watchdog.
    ///
    /// Must be called within a Tokio runtime.
    pub fn from_transport(
        resource: impl Into<String>,
        idn: impl Into<String>,
        transport: Box<dyn ScpiTransport>,
        config: &LaserConfig,
    ) -> Self {
        let transport = share(transport);
        let error = Arc::new(AtomicBool::new(false));
        let faults = Arc::new(StdMutex::new(Vec::new()));
        let watchdog = tokio::spawn(watchdog(
            transport.clone(),
            error.clone(),
            faults.clone(),
            config.watchdog_interval(),
        )
        .in_current_span());

        Self {
            resource: resource.into(),
            idn: idn.into(),
            transport,
            error,
            faults,
            watchdog: Some(watchdog),
            output_timeout: config.output_timeout(),
            closed: false,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn idn(&self) -> &str {
        &self.idn
    }

    /// True once the watchdog has seen any fault
    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }

    /// Every fault onset the watchdog has reported, in order.
    ///
    /// A fault that stays raised across polls is recorded once.
    pub fn faults(&self) -> Vec<LaserFault> {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Set the forward current limit in mA.
    ///
    /// With a prompt, raising the limit above the present one asks the
    /// operator first; a refusal leaves the limit as it was.
    pub async fn set_current_limit(
        &self,
        limit: f64,
        prompt: Option<&mut dyn Prompt>,
    ) -> AppResult<()> {
        if let Some(prompt) = prompt {
            let old_limit = self.query_register("LASER:LIMIT:LDI?").await?;
            if limit > f64::from(old_limit) {
                let question = format!("Raise Laser Io limit from {} to {} mA?", old_limit, limit);
                if !prompt.confirm(&question, Some(true)).await? {
                    return Ok(());
                }
            }
        }
        self.write(&format!("LASER:LIMIT:LDI {}", limit)).await?;
        info!("Set Laser Io limit to {} mA.", limit);
        Ok(())
    }

    /// Set the forward voltage limit in V, with the same confirmation rule
    /// as [`set_current_limit`](Self::set_current_limit).
    pub async fn set_voltage_limit(
        &self,
        limit: f64,
        prompt: Option<&mut dyn Prompt>,
    ) -> AppResult<()> {
        if let Some(prompt) = prompt {
            let old_limit = self.query_value("LASER:LIMIT:LDV?").await?;
            if limit > old_limit {
                let question = format!("Raise Laser Vf limit from {} to {} V?", old_limit, limit);
                if !prompt.confirm(&question, Some(true)).await? {
                    return Ok(());
                }
            }
        }
        self.write(&format!("LASER:LIMIT:LDV {}", limit)).await?;
        info!("Set Laser Vf limit to {} V.", limit);
        Ok(())
    }

    pub async fn current_limit(&self) -> AppResult<u32> {
        self.query_register("LASER:LIMIT:LDI?").await
    }

    pub async fn voltage_limit(&self) -> AppResult<f64> {
        self.query_value("LASER:LIMIT:LDV?").await
    }

    /// Set the output current in mA. Values above the driver's limit are refused.
    pub async fn set_output_current(&self, milliamps: f64) -> AppResult<()> {
        let limit = self.query_register("LASER:LIMIT:LDI?").await?;
        if milliamps > f64::from(limit) {
            return Err(ToolsError::LimitExceeded {
                requested: milliamps,
                limit: f64::from(limit),
            });
        }
        self.write(&format!("LASER:LDI {}", milliamps)).await
    }

    /// Measured forward voltage in V
    pub async fn get_voltage(&self) -> AppResult<f64> {
        self.query_value("LASER:LDV?").await
    }

    /// Set current in mA, as reported by the driver
    pub async fn get_current(&self) -> AppResult<f64> {
        self.query_value("LASER:LDI?").await
    }

    pub async fn enable_output(&self) -> AppResult<()> {
        self.set_enable(true, false).await
    }

    pub async fn disable_output(&self) -> AppResult<()> {
        self.set_enable(false, false).await
    }

    /// Switch the output. Unless `asynchronous`, wait for the condition
    /// register to confirm the change.
    pub async fn set_enable(&self, enable: bool, asynchronous: bool) -> AppResult<()> {
        self.write(&format!("LASER:OUTPUT {}", u8::from(enable)))
            .await?;
        if !asynchronous {
            self.wait_for_output(enable).await?;
        }
        Ok(())
    }

    pub async fn is_output_on(&self) -> AppResult<bool> {
        let cond = self.query_register("LASER:COND?").await?;
        Ok(cond & (1 << OUTPUT_ON_BIT) != 0)
    }

    async fn wait_for_output(&self, target: bool) -> AppResult<()> {
        let start = Instant::now();
        loop {
            let cond = self.query_register("LASER:COND?").await?;
            if (cond & (1 << OUTPUT_ON_BIT) != 0) == target {
                return Ok(());
            }
            let elapsed = start.elapsed();
            if elapsed > self.output_timeout {
                return Err(ToolsError::Timeout {
                    context: format!(
                        "Laser Driver waiting for condition laser_output={} (LASER:COND?={})",
                        target, cond
                    ),
                    elapsed,
                });
            }
            tokio::time::sleep(CONDITION_POLL).await;
        }
    }

    /// Send a raw command
    pub async fn write(&self, command: &str) -> AppResult<()> {
        self.transport.lock().await.write(command).await
    }

    /// Send a raw query
    pub async fn query(&self, command: &str) -> AppResult<String> {
        self.transport.lock().await.query(command).await
    }

    async fn query_value(&self, command: &str) -> AppResult<f64> {
        let mut transport = self.transport.lock().await;
        scpi::query_value(&mut **transport, command).await
    }

    async fn query_register(&self, command: &str) -> AppResult<u32> {
        let mut transport = self.transport.lock().await;
        scpi::query_register(&mut **transport, command).await
    }

    /// Disable the output, stop the watchdog and release the port.
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        info!("Closing {}: {}", self.resource, self.idn);

        let disabled = self.disable_output().await;
        if let Some(handle) = self.watchdog.take() {
            handle.abort();
        }
        let closed = self.transport.lock().await.close().await;
        disabled.and(closed)
    }
}

impl Drop for LaserDriver {
    fn drop(&mut self) {
        if let Some(handle) = self.watchdog.take() {
            handle.abort();
        }
        if !self.closed {
            warn!(
                "Laser driver {} dropped without close(); output state unknown",
                self.resource
            );
        }
    }
}

async fn watchdog(
    transport: SharedTransport,
    error: Arc<AtomicBool>,
    faults: Arc<StdMutex<Vec<LaserFault>>>,
    interval: Duration,
) {
    // Clear events latched by a previous run.
    {
        let mut t = transport.lock().await;
        if let Err(e) = scpi::query_register(&mut **t, "LASER:EVENT?").await {
            warn!("Watchdog could not clear LASER:EVENT?: {}", e);
        }
    }

    let mut active: Vec<LaserFault> = Vec::new();
    loop {
        tokio::time::sleep(interval).await;
        let event = {
            let mut t = transport.lock().await;
            scpi::query_register(&mut **t, "LASER:EVENT?").await
        };
        match event {
            Ok(value) => {
                let raised = LaserFault::decode(value);
                if !raised.is_empty() {
                    error.store(true, Ordering::SeqCst);
                }
                for fault in raised.iter().filter(|f| !active.contains(f)) {
                    warn!("Watchdog: Laser {}!!", fault);
                    faults
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(*fault);
                }
                active = raised;
            }
            Err(ToolsError::NotConnected(_)) => {
                debug!("Watchdog stopping, session closed");
                return;
            }
            Err(e) => warn!("Watchdog could not read LASER:EVENT?: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::interact::Prompter;
    use std::io::Cursor;
    use tracing_test::traced_test;

    /// Mock driver keeping output state and limits
    fn mock_laser() -> MockTransport {
        let mut output = false;
        let mut ldi_limit = 100.0_f64;
        let mut ldv_limit = 2.5_f64;
        let mut current = 0.0_f64;
        MockTransport::new("ASRL/dev/ttyUSB0::INSTR")
            .respond("*IDN?", "Arroyo 4302 LaserSource,123456,1.2")
            .respond("LASER:LDV?", "1.875")
            .with_handler(move |cmd| {
                let (head, arg) = match cmd.split_once(' ') {
                    Some((head, arg)) => (head, arg.parse::<f64>().ok()),
                    None => (cmd, None),
                };
                match (head, arg) {
                    ("LASER:OUTPUT", Some(v)) => output = v != 0.0,
                    ("LASER:LIMIT:LDI", Some(v)) => ldi_limit = v,
                    ("LASER:LIMIT:LDV", Some(v)) => ldv_limit = v,
                    ("LASER:LDI", Some(v)) => current = v,
                    ("LASER:COND?", _) => {
                        return Some(if output { "1024" } else { "0" }.to_string())
                    }
                    ("LASER:LIMIT:LDI?", _) => return Some(ldi_limit.to_string()),
                    ("LASER:LIMIT:LDV?", _) => return Some(ldv_limit.to_string()),
                    ("LASER:LDI?", _) => return Some(current.to_string()),
                    ("LASER:EVENT?", _) => return Some("0".to_string()),
                    _ => {}
                }
                None
            })
    }

    fn config() -> LaserConfig {
        LaserConfig::default()
    }

    fn prompter(input: &str) -> Prompter<Cursor<Vec<u8>>, Vec<u8>> {
        Prompter::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn test_fault_decoding() {
        assert!(LaserFault::decode(0).is_empty());
        assert_eq!(
            LaserFault::decode(0b1_1001_0011),
            vec![
                LaserFault::CurrentLimit,
                LaserFault::VoltageLimit,
                LaserFault::InterlockError,
                LaserFault::OpenCircuit,
                LaserFault::OutputShorted,
            ]
        );
        // Bits the watchdog does not watch
        assert!(LaserFault::decode(1 << 10 | 1 << 2).is_empty());
        assert_eq!(LaserFault::InterlockError.to_string(), "Interlock Error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_waits_for_condition_bit() {
        let mock = mock_laser();
        let mut laser = LaserDriver::from_transport("laser", "idn", Box::new(mock.clone()), &config());
        laser.enable_output().await.unwrap();
        assert!(laser.is_output_on().await.unwrap());
        assert_eq!(mock.calls_starting_with("LASER:OUTPUT"), vec!["LASER:OUTPUT 1"]);

        laser.close().await.unwrap();
        assert!(!mock.is_connected());
        assert_eq!(mock.calls_starting_with("LASER:OUTPUT"), vec!["LASER:OUTPUT 1", "LASER:OUTPUT 0"]);
        // Second close is a no-op
        laser.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_times_out_when_output_never_follows() {
        let mock = MockTransport::new("laser")
            .respond("LASER:COND?", "0")
            .respond("LASER:EVENT?", "0");
        let laser = LaserDriver::from_transport("laser", "idn", Box::new(mock), &config());
        let err = laser.enable_output().await.unwrap_err();
        match err {
            ToolsError::Timeout { context, elapsed } => {
                assert!(context.contains("LASER:COND?=0"));
                assert!(elapsed > Duration::from_millis(5000));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_output_current_refused_above_limit() {
        let mock = mock_laser();
        let laser = LaserDriver::from_transport("laser", "idn", Box::new(mock.clone()), &config());
        laser.set_output_current(40.0).await.unwrap();
        assert!(matches!(
            laser.set_output_current(150.0).await,
            Err(ToolsError::LimitExceeded { requested, limit }) if requested == 150.0 && limit == 100.0
        ));
        assert_eq!(mock.calls_starting_with("LASER:LDI "), vec!["LASER:LDI 40"]);
        assert_eq!(laser.get_voltage().await.unwrap(), 1.875);
    }

    #[tokio::test]
    async fn test_raising_limit_asks_first() {
        let mock = mock_laser();
        let laser = LaserDriver::from_transport("laser", "idn", Box::new(mock.clone()), &config());

        let mut p = prompter("n\n");
        laser.set_current_limit(150.0, Some(&mut p)).await.unwrap();
        assert!(mock.calls_starting_with("LASER:LIMIT:LDI ").is_empty());
        let text = String::from_utf8(p.into_output()).unwrap();
        assert!(text.contains("Raise Laser Io limit from 100 to 150 mA?"));

        let mut p = prompter("y\n");
        laser.set_current_limit(150.0, Some(&mut p)).await.unwrap();
        assert_eq!(laser.current_limit().await.unwrap(), 150);

        // Lowering never asks
        let mut p = prompter("");
        laser.set_voltage_limit(2.0, Some(&mut p)).await.unwrap();
        assert_eq!(laser.voltage_limit().await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn test_raising_voltage_limit_asks_first() {
        let mock = mock_laser();
        let laser = LaserDriver::from_transport("laser", "idn", Box::new(mock.clone()), &config());

        let mut p = prompter("n\n");
        laser.set_voltage_limit(3.5, Some(&mut p)).await.unwrap();
        assert!(mock.calls_starting_with("LASER:LIMIT:LDV ").is_empty());
        assert_eq!(laser.voltage_limit().await.unwrap(), 2.5);
        let text = String::from_utf8(p.into_output()).unwrap();
        assert!(text.contains("Raise Laser Vf limit from 2.5 to 3.5 V?"));

        let mut p = prompter("\n");
        laser.set_voltage_limit(3.5, Some(&mut p)).await.unwrap();
        assert_eq!(mock.calls_starting_with("LASER:LIMIT:LDV "), vec!["LASER:LIMIT:LDV 3.5"]);
        assert_eq!(laser.voltage_limit().await.unwrap(), 3.5);

        // Without a prompt the limit is written as given
        laser.set_voltage_limit(4.0, None).await.unwrap();
        assert_eq!(laser.voltage_limit().await.unwrap(), 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_asynchronous_enable_does_not_wait() {
        // The output never reports on, so a waiting enable would time out.
        let mock = MockTransport::new("laser")
            .respond("LASER:COND?", "0")
            .respond("LASER:EVENT?", "0");
        let laser = LaserDriver::from_transport("laser", "idn", Box::new(mock.clone()), &config());
        let start = Instant::now();
        laser.set_enable(true, true).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(mock.calls_starting_with("LASER:OUTPUT"), vec!["LASER:OUTPUT 1"]);
        assert!(mock.calls_starting_with("LASER:COND?").is_empty());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_watchdog_flags_faults() {
        let mock = MockTransport::new("laser").respond_sequence("LASER:EVENT?", &["1", "0", "0", "144", "0"]);
        let laser = LaserDriver::from_transport("laser", "idn", Box::new(mock.clone()), &config());

        // The clearing read discards the stale event.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!laser.has_error());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(laser.has_error());
        assert_eq!(
            laser.faults(),
            vec![LaserFault::InterlockError, LaserFault::OpenCircuit]
        );
        assert!(logs_contain("Watchdog: Laser Interlock Error!!"));
        assert!(logs_contain("Watchdog: Laser Open Circuit!!"));
        drop(laser);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_fault_recorded_once() {
        let mock = MockTransport::new("laser")
            .respond_sequence("LASER:EVENT?", &["0", "16", "16", "16", "0", "16"]);
        let laser = LaserDriver::from_transport("laser", "idn", Box::new(mock.clone()), &config());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(laser.faults(), vec![LaserFault::InterlockError]);

        // Cleared for one poll, then raised again: a new onset.
        tokio::time::sleep(Duration::from_millis(4000)).await;
        assert!(laser.has_error());
        assert_eq!(
            laser.faults(),
            vec![LaserFault::InterlockError, LaserFault::InterlockError]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_survives_failed_query() {
        let mock = MockTransport::new("laser").respond_sequence("LASER:EVENT?", &["0", "0", "1"]);
        let laser = LaserDriver::from_transport("laser", "idn", Box::new(mock.clone()), &config());
        tokio::time::sleep(Duration::from_millis(10)).await;
        mock.inject_next_failure();
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert!(laser.has_error());
        assert_eq!(laser.faults(), vec![LaserFault::CurrentLimit]);
    }

    #[tokio::test]
    async fn test_connect_retries_identification() {
        use crate::hardware::MockBackend;

        let mock = mock_laser();
        mock.inject_next_failure();
        let rm = ResourceManager::with_backend(Arc::new(MockBackend::new().with_instrument(mock.clone())));
        let mut p = prompter("");
        let options = LaserOptions {
            resource: Some("ASRL/dev/ttyUSB0::INSTR".into()),
            io_max: Some(80.0),
            ..LaserOptions::default()
        };
        let mut laser = LaserDriver::connect(&rm, &mut p, options).await.unwrap();
        assert_eq!(laser.idn(), "Arroyo 4302 LaserSource,123456,1.2");
        assert_eq!(rm.list_opened(), vec!["ASRL/dev/ttyUSB0::INSTR"]);
        assert_eq!(mock.calls_starting_with("LASER:LIMIT:LDI "), vec!["LASER:LIMIT:LDI 80"]);

        laser.close().await.unwrap();
        assert!(rm.list_opened().is_empty());
        let text = String::from_utf8(p.into_output()).unwrap();
        assert!(text.contains("Clear any errors that appear on the Laser Driver Screen"));
        assert!(text.contains("Successfully connected to Arroyo 4302"));
    }
}
