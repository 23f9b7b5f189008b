//! Console commands for the instruments the tools drive interactively

use async_trait::async_trait;

use crate::error::{AppResult, ToolsError};
use crate::instrument::agilent33500::{AmplitudeUnit, Waveform};
use crate::instrument::{FunctionGenerator, LaserDriver, Oscilloscope, TriggerMode};
use crate::interact::console::{number_arg, CommandOutcome, ConsoleHandler};

fn no_args(command: &str, args: &[&str]) -> AppResult<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ToolsError::OutOfRange(format!("{} takes no arguments", command)))
    }
}

fn raw(command: &str, args: &[&str]) -> AppResult<String> {
    if args.is_empty() {
        return Err(ToolsError::OutOfRange(format!("{} needs a command", command)));
    }
    Ok(args.join(" "))
}

/// Laser driver commands
pub struct LaserHandler<'a> {
    laser: &'a LaserDriver,
}

impl<'a> LaserHandler<'a> {
    pub fn new(laser: &'a LaserDriver) -> Self {
        Self { laser }
    }

    async fn status(&self) -> AppResult<String> {
        let on = self.laser.is_output_on().await?;
        let current = self.laser.get_current().await?;
        let voltage = self.laser.get_voltage().await?;
        let faults = self.laser.faults();
        let faults = if faults.is_empty() {
            "none".to_string()
        } else {
            faults.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(", ")
        };
        Ok(format!(
            "output {}, {} mA, {} V, faults: {}",
            if on { "on" } else { "off" },
            current,
            voltage,
            faults
        ))
    }
}

#[async_trait]
impl<'a> ConsoleHandler for LaserHandler<'a> {
    fn name(&self) -> &str {
        "laser"
    }

    fn help(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("on | off", "enable or disable the output"),
            ("current [mA]", "set or read the output current"),
            ("voltage", "read the forward voltage"),
            ("limit [mA]", "set or read the current limit"),
            ("vlimit [V]", "set or read the voltage limit"),
            ("status", "output state, readings and watchdog faults"),
            ("write <cmd>", "send a raw command"),
            ("query <cmd>", "send a raw query and print the reply"),
        ]
    }

    async fn handle(&mut self, command: &str, args: &[&str]) -> AppResult<CommandOutcome> {
        let laser = self.laser;
        let outcome = match command {
            "on" => {
                no_args(command, args)?;
                laser.enable_output().await?;
                CommandOutcome::Done
            }
            "off" => {
                no_args(command, args)?;
                laser.disable_output().await?;
                CommandOutcome::Done
            }
            "current" if args.is_empty() => {
                CommandOutcome::Output(format!("{} mA", laser.get_current().await?))
            }
            "current" => {
                laser.set_output_current(number_arg(command, args)?).await?;
                CommandOutcome::Done
            }
            "voltage" => CommandOutcome::Output(format!("{} V", laser.get_voltage().await?)),
            "limit" if args.is_empty() => {
                CommandOutcome::Output(format!("{} mA", laser.current_limit().await?))
            }
            "limit" => {
                laser.set_current_limit(number_arg(command, args)?, None).await?;
                CommandOutcome::Done
            }
            "vlimit" if args.is_empty() => {
                CommandOutcome::Output(format!("{} V", laser.voltage_limit().await?))
            }
            "vlimit" => {
                laser.set_voltage_limit(number_arg(command, args)?, None).await?;
                CommandOutcome::Done
            }
            "status" => CommandOutcome::Output(self.status().await?),
            "write" => {
                laser.write(&raw(command, args)?).await?;
                CommandOutcome::Done
            }
            "query" => CommandOutcome::Output(laser.query(&raw(command, args)?).await?),
            _ => CommandOutcome::Unknown,
        };
        Ok(outcome)
    }
}

/// Function generator commands on a selectable channel
pub struct FunctionGeneratorHandler<'a> {
    fngen: &'a mut FunctionGenerator,
    channel: u8,
}

impl<'a> FunctionGeneratorHandler<'a> {
    pub fn new(fngen: &'a mut FunctionGenerator, channel: u8) -> AppResult<Self> {
        fngen.channel(channel)?;
        Ok(Self { fngen, channel })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }
}

#[async_trait]
impl<'a> ConsoleHandler for FunctionGeneratorHandler<'a> {
    fn name(&self) -> &str {
        match self.channel {
            1 => "fngen ch1",
            _ => "fngen ch2",
        }
    }

    fn help(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("channel <1|2>", "select the channel the other commands act on"),
            ("shape [SIN|SQU|...]", "set or read the waveform"),
            ("freq [Hz]", "set or read the frequency"),
            ("amp [V]", "set or read the amplitude"),
            ("offset [V]", "set or read the DC offset"),
            ("units <VPP|VRMS|DBM>", "amplitude unit"),
            ("duty <%>", "square wave duty cycle"),
            ("on | off", "enable or disable the output"),
            ("write <cmd>", "send a raw command"),
            ("query <cmd>", "send a raw query and print the reply"),
        ]
    }

    async fn handle(&mut self, command: &str, args: &[&str]) -> AppResult<CommandOutcome> {
        if command == "channel" {
            let number = number_arg(command, args)?;
            let number = u8::try_from(number as i64)
                .map_err(|_| ToolsError::OutOfRange(format!("channel {}", number)))?;
            self.fngen.channel(number)?;
            self.channel = number;
            return Ok(CommandOutcome::Done);
        }
        if command == "write" {
            self.fngen.write(&raw(command, args)?).await?;
            return Ok(CommandOutcome::Done);
        }
        if command == "query" {
            return Ok(CommandOutcome::Output(self.fngen.query(&raw(command, args)?).await?));
        }

        let mut ch = self.fngen.channel(self.channel)?;
        let outcome = match (command, args) {
            ("shape", []) => CommandOutcome::Output(ch.shape().await?.to_string()),
            ("shape", [shape]) => {
                ch.set_shape(shape.parse::<Waveform>()?).await?;
                CommandOutcome::Done
            }
            ("freq", []) => CommandOutcome::Output(format!("{} Hz", ch.frequency().await?)),
            ("freq", _) => {
                ch.set_frequency(number_arg(command, args)?).await?;
                CommandOutcome::Done
            }
            ("amp", []) => CommandOutcome::Output(format!("{} V", ch.amplitude().await?)),
            ("amp", _) => {
                ch.set_amplitude(number_arg(command, args)?).await?;
                CommandOutcome::Done
            }
            ("offset", []) => CommandOutcome::Output(format!("{} V", ch.offset().await?)),
            ("offset", _) => {
                ch.set_offset(number_arg(command, args)?).await?;
                CommandOutcome::Done
            }
            ("units", [unit]) => {
                ch.set_amplitude_unit(unit.parse::<AmplitudeUnit>()?).await?;
                CommandOutcome::Done
            }
            ("duty", _) => {
                ch.set_square_duty_cycle(number_arg(command, args)?).await?;
                CommandOutcome::Done
            }
            ("on", []) => {
                ch.set_output(true).await?;
                CommandOutcome::Done
            }
            ("off", []) => {
                ch.set_output(false).await?;
                CommandOutcome::Done
            }
            ("shape" | "units" | "on" | "off", _) => {
                return Err(ToolsError::OutOfRange(format!(
                    "wrong number of arguments for {}",
                    command
                )))
            }
            _ => CommandOutcome::Unknown,
        };
        Ok(outcome)
    }
}

/// Oscilloscope commands
pub struct ScopeHandler<'a> {
    scope: &'a mut Oscilloscope,
}

impl<'a> ScopeHandler<'a> {
    pub fn new(scope: &'a mut Oscilloscope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl<'a> ConsoleHandler for ScopeHandler<'a> {
    fn name(&self) -> &str {
        "scope"
    }

    fn help(&self) -> Vec<(&'static str, &'static str)> {
        let mut help = vec![
            ("trigger <auto|normal>", "trigger mode"),
            ("hscale <s/div>", "horizontal scale"),
            ("hpos <0-100>", "horizontal position, percent of the record"),
            ("reset", "restore factory settings"),
            ("channels", "list the displayed channels"),
        ];
        if cfg!(feature = "storage_csv") {
            help.push(("save <file.csv>", "capture every displayed channel to a file"));
        }
        help.push(("write <cmd>", "send a raw command"));
        help.push(("query <cmd>", "send a raw query and print the reply"));
        help
    }

    async fn handle(&mut self, command: &str, args: &[&str]) -> AppResult<CommandOutcome> {
        let scope = &mut *self.scope;
        let outcome = match (command, args) {
            ("trigger", [mode]) => {
                scope.set_trigger_mode(mode.parse::<TriggerMode>()?).await?;
                CommandOutcome::Done
            }
            ("hscale", _) => {
                scope.set_horizontal_scale(number_arg(command, args)?).await?;
                CommandOutcome::Done
            }
            ("hpos", _) => {
                scope.set_horizontal_position(number_arg(command, args)?).await?;
                CommandOutcome::Done
            }
            ("reset", []) => {
                scope.reset().await?;
                CommandOutcome::Done
            }
            ("channels", []) => {
                let mut shown = Vec::new();
                for channel in crate::instrument::tektronix::CHANNELS {
                    if scope.is_displayed(channel).await? {
                        shown.push(format!("CH{}", channel));
                    }
                }
                CommandOutcome::Output(shown.join(" "))
            }
            #[cfg(feature = "storage_csv")]
            ("save", [path]) => {
                let captured = scope.retrieve_all_waveforms().await?;
                let requested: Vec<u8> = captured.keys().copied().collect();
                let table = crate::data::WaveformTable::from_waveforms(&requested, &captured)?;
                table.write_csv(*path)?;
                CommandOutcome::Output(format!(
                    "Saved {} samples of {:?} to {}",
                    table.len(),
                    requested,
                    path
                ))
            }
            ("write", _) => {
                scope.send_raw_command(&raw(command, args)?).await?;
                CommandOutcome::Done
            }
            ("query", _) => CommandOutcome::Output(scope.query(&raw(command, args)?).await?),
            ("trigger" | "reset" | "channels" | "save", _) => {
                return Err(ToolsError::OutOfRange(format!(
                    "wrong number of arguments for {}",
                    command
                )))
            }
            _ => CommandOutcome::Unknown,
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::config::LaserConfig;
    use crate::interact::{Console, Prompter};
    use std::io::Cursor;

    fn prompter(script: &str) -> Prompter<Cursor<Vec<u8>>, Vec<u8>> {
        Prompter::new(Cursor::new(script.as_bytes().to_vec()), Vec::new())
    }

    async fn run(script: &str, handler: &mut dyn ConsoleHandler) -> String {
        let mut p = prompter(script);
        Console::new().run(&mut p, handler).await.unwrap();
        String::from_utf8(p.into_output()).unwrap()
    }

    #[tokio::test]
    async fn test_laser_commands() {
        let mock = MockTransport::new("laser")
            .respond("LASER:LIMIT:LDI?", "50")
            .respond("LASER:LDI?", "12.5")
            .respond("LASER:LDV?", "1.9")
            .respond("LASER:EVENT?", "0");
        let mut laser =
            LaserDriver::from_transport("laser", "idn", Box::new(mock.clone()), &LaserConfig::default());
        let text = {
            let mut handler = LaserHandler::new(&laser);
            run("current 20\ncurrent 80\ncurrent\nlimit 60\nquit\n", &mut handler).await
        };
        assert_eq!(mock.calls_starting_with("LASER:LDI "), vec!["LASER:LDI 20"]);
        assert_eq!(mock.calls_starting_with("LASER:LIMIT:LDI "), vec!["LASER:LIMIT:LDI 60"]);
        assert!(text.contains("Error: Requested 80 exceeds the 50 limit"));
        assert!(text.contains("12.5 mA"));
        // No LASER:COND? reply, so the disable inside close times out
        let _ = laser.close().await;
    }

    #[tokio::test]
    async fn test_fngen_channel_switch() {
        let mock = MockTransport::new("fngen")
            .respond("*IDN?", "Agilent 33522B")
            .respond("SOUR2:FREQ?", "1000");
        let mut fngen = FunctionGenerator::from_transport(Box::new(mock.clone())).await.unwrap();
        let text = {
            let mut handler = FunctionGeneratorHandler::new(&mut fngen, 1).unwrap();
            let text = run("shape squ\nchannel 2\namp 0.5\nfreq\non\nchannel 3\n", &mut handler).await;
            assert_eq!(handler.channel(), 2);
            text
        };
        assert!(mock.call_log().contains(&"SOUR1:FUNC SQU".to_string()));
        assert!(mock.call_log().contains(&"SOUR2:VOLT 0.5".to_string()));
        assert!(mock.call_log().contains(&"OUTP2 ON".to_string()));
        assert!(text.contains("1000 Hz"));
        assert!(text.contains("channel 3 does not exist"));
    }

    #[tokio::test]
    async fn test_scope_commands() {
        let mock = MockTransport::new("TCPSOCKET::169.254.8.194::4000::SOCKET")
            .respond("*IDN?", "TEKTRONIX,MSO44")
            .respond(":SELect:CH1?", "1")
            .respond(":SELect:CH2?", "0")
            .respond(":SELect:CH3?", "1")
            .respond(":SELect:CH4?", "0");
        let mut scope = Oscilloscope::from_transport(Box::new(mock.clone())).await.unwrap();
        let text = {
            let mut handler = ScopeHandler::new(&mut scope);
            run("trigger normal\nhpos 150\nchannels\nreset now\n", &mut handler).await
        };
        assert!(mock.call_log().contains(&":TRIGger:A:MODE NORMal".to_string()));
        assert!(mock.calls_starting_with(":HORIZONTAL:POSITION").is_empty());
        assert!(text.contains("CH1 CH3\n"));
        assert!(text.contains("wrong number of arguments for reset"));
    }
}
