//! Agilent/Keysight 33500B series function generator
//!
//! Two-channel arbitrary waveform generator. Settings are addressed per
//! channel (`SOUR1:FREQ 2000`, `OUTP2 ON`), so the API hands out a
//! [`Channel`] borrow and every setter checks its argument against the
//! instrument's documented range before sending anything.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use crate::adapters::{ScpiTransport, SessionSettings};
use crate::config::ToolsConfig;
use crate::error::{AppResult, ToolsError};
use crate::hardware::ResourceManager;
use crate::interact::{resolve_resource, Prompt, ResolveOptions};
use crate::scpi;

/// Role the resource is cached under
pub const ROLE: &str = "Agilent33500";

pub const CHANNELS: std::ops::RangeInclusive<u8> = 1..=2;
pub const FREQUENCY_RANGE: std::ops::RangeInclusive<f64> = 1e-6..=120e6;
pub const AMPLITUDE_RANGE: std::ops::RangeInclusive<f64> = 0.01..=10.0;
pub const OFFSET_RANGE: std::ops::RangeInclusive<f64> = -4.995..=4.995;
/// Square wave duty cycle, percent
pub const DUTY_CYCLE_RANGE: std::ops::RangeInclusive<f64> = 0.01..=99.99;

/// Generates `Display` (SCPI mnemonic) and case-insensitive `FromStr`
/// (mnemonic or long form) for a settings enum.
macro_rules! scpi_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $short:literal $(| $alias:literal)*),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $($name::$variant => $short),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.mnemonic())
            }
        }

        impl FromStr for $name {
            type Err = ToolsError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let upper = s.trim().to_ascii_uppercase();
                $(
                    if upper == $short $(|| upper == $alias)* {
                        return Ok($name::$variant);
                    }
                )+
                Err(ToolsError::OutOfRange(format!(
                    "'{}' is not one of {}",
                    s,
                    Self::ALL.iter().map(|v| v.mnemonic()).collect::<Vec<_>>().join(", ")
                )))
            }
        }
    };
}

scpi_enum!(
    /// Output function
    Waveform {
        Sine => "SIN" | "SINUSOID",
        Square => "SQU" | "SQUARE",
        Triangle => "TRI" | "TRIANGLE",
        Ramp => "RAMP",
        Pulse => "PULS" | "PULSE",
        Prbs => "PRBS",
        Noise => "NOIS" | "NOISE",
        Arbitrary => "ARB",
        Dc => "DC",
    }
);

scpi_enum!(
    /// How the amplitude setting is interpreted
    AmplitudeUnit {
        Vpp => "VPP",
        Vrms => "VRMS",
        Dbm => "DBM",
    }
);

scpi_enum!(
    /// Burst behaviour
    BurstMode {
        Triggered => "TRIG" | "TRIGGERED",
        Gated => "GAT" | "GATED",
    }
);

scpi_enum!(
    /// What starts a triggered burst
    TriggerSource {
        Immediate => "IMM" | "IMMEDIATE",
        External => "EXT" | "EXTERNAL",
        Timer => "TIM" | "TIMER",
        Bus => "BUS",
    }
);

fn check_range(
    what: &str,
    value: f64,
    range: &std::ops::RangeInclusive<f64>,
    unit: &str,
) -> AppResult<()> {
    if value.is_finite() && range.contains(&value) {
        Ok(())
    } else {
        Err(ToolsError::OutOfRange(format!(
            "{} {} {} outside {}..={} {}",
            what,
            value,
            unit,
            range.start(),
            range.end(),
            unit
        )))
    }
}

pub struct FunctionGenerator {
    transport: Box<dyn ScpiTransport>,
    idn: String,
}

impl FunctionGenerator {
    /// Resolve and open the generator. `resource` skips resolution.
    pub async fn connect(
        rm: &ResourceManager,
        prompt: &mut dyn Prompt,
        resource: Option<String>,
        resolve: &ResolveOptions,
    ) -> AppResult<Self> {
        prompt.message("Connecting to Agilent 33500 Function Generator:")?;
        let resource = match resource {
            Some(resource) => resource,
            None => resolve_resource(rm, prompt, resolve).await?,
        };
        let transport = rm.open(&resource, &SessionSettings::default()).await?;
        let fngen = Self::from_transport(transport).await?;
        prompt.message(&format!("Successfully connected to {}", fngen.idn))?;
        Ok(fngen)
    }

    pub fn resolve_options(config: &ToolsConfig) -> ResolveOptions {
        ResolveOptions::from_config(config, ROLE)
    }

    pub async fn from_transport(mut transport: Box<dyn ScpiTransport>) -> AppResult<Self> {
        let idn = scpi::identify(&mut *transport).await?;
        info!("Function generator: {}", idn);
        Ok(Self { transport, idn })
    }

    pub fn idn(&self) -> &str {
        &self.idn
    }

    /// Settings of output `number` (1 or 2)
    pub fn channel(&mut self, number: u8) -> AppResult<Channel<'_>> {
        if !CHANNELS.contains(&number) {
            return Err(ToolsError::OutOfRange(format!(
                "channel {} does not exist, the 33500B has channels 1 and 2",
                number
            )));
        }
        Ok(Channel {
            fngen: self,
            number,
        })
    }

    pub async fn write(&mut self, command: &str) -> AppResult<()> {
        debug!("fngen <- {}", command);
        self.transport.write(command).await
    }

    pub async fn query(&mut self, command: &str) -> AppResult<String> {
        self.transport.query(command).await
    }

    /// Turn both outputs off and release the session
    pub async fn close(&mut self) -> AppResult<()> {
        for number in CHANNELS {
            self.channel(number)?.set_output(false).await?;
        }
        self.disconnect().await
    }

    /// Release the session, leaving the outputs as they are
    pub async fn disconnect(&mut self) -> AppResult<()> {
        self.transport.close().await
    }
}

/// One output of a [`FunctionGenerator`]
pub struct Channel<'a> {
    fngen: &'a mut FunctionGenerator,
    number: u8,
}

impl Channel<'_> {
    pub fn number(&self) -> u8 {
        self.number
    }

    async fn write(&mut self, command: String) -> AppResult<()> {
        self.fngen.write(&command).await
    }

    async fn query_value(&mut self, command: String) -> AppResult<f64> {
        scpi::query_value(&mut *self.fngen.transport, &command).await
    }

    pub async fn set_shape(&mut self, shape: Waveform) -> AppResult<()> {
        self.write(format!("SOUR{}:FUNC {}", self.number, shape)).await
    }

    pub async fn shape(&mut self) -> AppResult<Waveform> {
        let response = self
            .fngen
            .query(&format!("SOUR{}:FUNC?", self.number))
            .await?;
        response.parse()
    }

    /// Frequency in Hz
    pub async fn set_frequency(&mut self, hz: f64) -> AppResult<()> {
        check_range("frequency", hz, &FREQUENCY_RANGE, "Hz")?;
        self.write(format!("SOUR{}:FREQ {}", self.number, hz)).await
    }

    pub async fn frequency(&mut self) -> AppResult<f64> {
        self.query_value(format!("SOUR{}:FREQ?", self.number)).await
    }

    /// Amplitude in the channel's amplitude unit
    pub async fn set_amplitude(&mut self, amplitude: f64) -> AppResult<()> {
        check_range("amplitude", amplitude, &AMPLITUDE_RANGE, "V")?;
        self.write(format!("SOUR{}:VOLT {}", self.number, amplitude))
            .await
    }

    pub async fn amplitude(&mut self) -> AppResult<f64> {
        self.query_value(format!("SOUR{}:VOLT?", self.number)).await
    }

    /// DC offset in V
    pub async fn set_offset(&mut self, volts: f64) -> AppResult<()> {
        check_range("offset", volts, &OFFSET_RANGE, "V")?;
        self.write(format!("SOUR{}:VOLT:OFFS {}", self.number, volts))
            .await
    }

    pub async fn offset(&mut self) -> AppResult<f64> {
        self.query_value(format!("SOUR{}:VOLT:OFFS?", self.number))
            .await
    }

    pub async fn set_amplitude_unit(&mut self, unit: AmplitudeUnit) -> AppResult<()> {
        self.write(format!("SOUR{}:VOLT:UNIT {}", self.number, unit))
            .await
    }

    pub async fn set_output(&mut self, on: bool) -> AppResult<()> {
        self.write(format!(
            "OUTP{} {}",
            self.number,
            if on { "ON" } else { "OFF" }
        ))
        .await
    }

    pub async fn output(&mut self) -> AppResult<bool> {
        scpi::query_bool(
            &mut *self.fngen.transport,
            &format!("OUTP{}?", self.number),
        )
        .await
    }

    /// Square wave duty cycle in percent
    pub async fn set_square_duty_cycle(&mut self, percent: f64) -> AppResult<()> {
        check_range("duty cycle", percent, &DUTY_CYCLE_RANGE, "%")?;
        self.write(format!("SOUR{}:FUNC:SQU:DCYC {}", self.number, percent))
            .await
    }

    pub async fn set_burst_state(&mut self, on: bool) -> AppResult<()> {
        self.write(format!(
            "SOUR{}:BURS:STAT {}",
            self.number,
            if on { "ON" } else { "OFF" }
        ))
        .await
    }

    pub async fn set_burst_mode(&mut self, mode: BurstMode) -> AppResult<()> {
        self.write(format!("SOUR{}:BURS:MODE {}", self.number, mode))
            .await
    }

    pub async fn set_trigger_source(&mut self, source: TriggerSource) -> AppResult<()> {
        self.write(format!("TRIG{}:SOUR {}", self.number, source))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;

    async fn fngen(mock: &MockTransport) -> FunctionGenerator {
        FunctionGenerator::from_transport(Box::new(mock.clone()))
            .await
            .unwrap()
    }

    fn mock() -> MockTransport {
        MockTransport::new("USB0::0x0957::0x2807::MY1::INSTR")
            .respond("*IDN?", "Agilent Technologies,33522B,MY1,3.0")
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("squ".parse::<Waveform>().unwrap(), Waveform::Square);
        assert_eq!("SINUSOID".parse::<Waveform>().unwrap(), Waveform::Sine);
        assert_eq!("IMMEDIATE".parse::<TriggerSource>().unwrap(), TriggerSource::Immediate);
        assert_eq!(AmplitudeUnit::Vpp.to_string(), "VPP");
        let err = "SAW".parse::<Waveform>().unwrap_err();
        assert!(err.to_string().contains("SIN, SQU, TRI, RAMP, PULS, PRBS, NOIS, ARB, DC"));
    }

    #[tokio::test]
    async fn test_channel_commands() {
        let mock = mock();
        let mut f = fngen(&mock).await;
        assert_eq!(f.idn(), "Agilent Technologies,33522B,MY1,3.0");
        mock.clear_log();

        let mut ch = f.channel(2).unwrap();
        ch.set_output(false).await.unwrap();
        ch.set_shape(Waveform::Square).await.unwrap();
        ch.set_frequency(2e3).await.unwrap();
        ch.set_square_duty_cycle(50.0).await.unwrap();
        ch.set_amplitude_unit(AmplitudeUnit::Vpp).await.unwrap();
        ch.set_burst_mode(BurstMode::Triggered).await.unwrap();
        ch.set_trigger_source(TriggerSource::Immediate).await.unwrap();
        ch.set_amplitude(0.8).await.unwrap();
        ch.set_offset(0.4).await.unwrap();

        assert_eq!(
            mock.call_log(),
            vec![
                "OUTP2 OFF",
                "SOUR2:FUNC SQU",
                "SOUR2:FREQ 2000",
                "SOUR2:FUNC:SQU:DCYC 50",
                "SOUR2:VOLT:UNIT VPP",
                "SOUR2:BURS:MODE TRIG",
                "TRIG2:SOUR IMM",
                "SOUR2:VOLT 0.8",
                "SOUR2:VOLT:OFFS 0.4",
            ]
        );
    }

    #[tokio::test]
    async fn test_out_of_range_settings_never_reach_the_instrument() {
        let mock = mock();
        let mut f = fngen(&mock).await;
        assert!(f.channel(3).is_err());
        mock.clear_log();

        let mut ch = f.channel(1).unwrap();
        assert!(ch.set_frequency(200e6).await.is_err());
        assert!(ch.set_amplitude(0.005).await.is_err());
        assert!(ch.set_amplitude(f64::NAN).await.is_err());
        assert!(ch.set_square_duty_cycle(100.0).await.is_err());
        assert!(mock.call_log().is_empty());
    }

    #[tokio::test]
    async fn test_queries() {
        let mock = mock()
            .respond("SOUR1:FUNC?", "SIN")
            .respond("SOUR1:FREQ?", "+1.0000000000000E+03")
            .respond("OUTP1?", "1");
        let mut f = fngen(&mock).await;
        let mut ch = f.channel(1).unwrap();
        assert_eq!(ch.shape().await.unwrap(), Waveform::Sine);
        assert_eq!(ch.frequency().await.unwrap(), 1000.0);
        assert!(ch.output().await.unwrap());
    }

    #[tokio::test]
    async fn test_close_disables_both_outputs() {
        let mock = mock();
        let mut f = fngen(&mock).await;
        f.close().await.unwrap();
        assert_eq!(mock.calls_starting_with("OUTP"), vec!["OUTP1 OFF", "OUTP2 OFF"]);
        assert!(!mock.is_connected());
    }
}
