//! End-to-end P-I-V measurement against simulated instruments.
//!
//! Resolves both instruments through the interactive picker, runs the sweep
//! and appends the result to a spreadsheet, the way `laser-piv` does.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use measurement_tools::adapters::MockTransport;
use measurement_tools::config::ToolsConfig;
use measurement_tools::data::{add_to_spreadsheet, read_spreadsheet};
use measurement_tools::hardware::{MockBackend, ResourceManager};
use measurement_tools::instrument::{LaserDriver, LaserOptions, PowerMeter};
use measurement_tools::interact::{Prompter, ResourceCache};
use measurement_tools::measurement::{run_piv, sweep_currents, PivInstruments, PivSettings};

const LASER: &str = "ASRL/dev/ttyUSB0::INSTR";
const METER: &str = "USB0::0x1313::0x8078::P0012345::INSTR";

fn simulated_laser() -> MockTransport {
    let mut output = false;
    let mut current = 0.0_f64;
    MockTransport::new(LASER)
        .respond("*IDN?", "Arroyo 4302 LaserSource")
        .respond("LASER:LIMIT:LDI?", "100")
        .respond("LASER:LIMIT:LDV?", "5")
        .respond("LASER:EVENT?", "0")
        .with_handler(move |cmd| {
            if let Some(value) = cmd.strip_prefix("LASER:LDI ") {
                current = value.parse().unwrap_or(0.0);
                return None;
            }
            match cmd {
                "LASER:OUTPUT 1" => output = true,
                "LASER:OUTPUT 0" => output = false,
                "LASER:COND?" => return Some(if output { "1024" } else { "0" }.to_string()),
                // Forward voltage rises with the bias
                "LASER:LDV?" => return Some(format!("{}", 1.0 + current / 100.0)),
                _ => {}
            }
            None
        })
}

fn simulated_meter() -> MockTransport {
    MockTransport::new(METER)
        .respond("SYST:SENS:IDN?", "S121C,12345,10-Jan-2020,1,18,289")
        .respond("READ?", "5.0E-4")
}

#[tokio::test(start_paused = true)]
async fn test_piv_sweep_with_picker_and_spreadsheet() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("cache.json");
    let spreadsheet = dir.path().join("piv.csv");

    let mut config = ToolsConfig::default();
    config.cache.path = cache_path.clone();

    let laser_mock = simulated_laser();
    let backend = MockBackend::new()
        .with_instrument(laser_mock.clone())
        .with_instrument(simulated_meter());
    let rm = ResourceManager::with_backend(Arc::new(backend));

    // Pick the laser from the list, create the cache, remember the meter, start.
    let mut prompt = Prompter::new(Cursor::new(b"0\ny\ny\ny\n".to_vec()), Vec::new());

    let options = LaserOptions {
        io_max: Some(20.0),
        vf_max: Some(3.2),
        ..LaserOptions::from_config(&config)
    };
    let mut laser = LaserDriver::connect(&rm, &mut prompt, options).await.unwrap();
    let mut meter = PowerMeter::connect(&rm, &mut prompt, None, &PowerMeter::resolve_options(&config))
        .await
        .unwrap();
    assert_eq!(rm.list_opened(), vec![LASER.to_string(), METER.to_string()]);

    let settings = PivSettings {
        settle: Duration::from_millis(500),
        nsamples: 2,
        show_progress: false,
        ..PivSettings::from_config(&config.sweep)
    };
    let currents = sweep_currents(0, 20, 10).unwrap();
    let result = run_piv(
        PivInstruments {
            laser: &laser,
            meter: &mut meter,
            fngen: None,
        },
        &currents,
        &settings,
        &mut prompt,
    )
    .await
    .unwrap();

    laser.close().await.unwrap();
    meter.close().await.unwrap();
    assert!(rm.list_opened().is_empty());
    assert!(!laser_mock.is_connected());
    assert_eq!(laser_mock.calls_starting_with("LASER:LIMIT:LDI "), vec!["LASER:LIMIT:LDI 20"]);
    assert_eq!(laser_mock.calls_starting_with("LASER:OUTPUT"), vec!["LASER:OUTPUT 1", "LASER:OUTPUT 0"]);

    assert!(!result.aborted);
    assert_eq!(result.voltages, vec![1.0, 1.1, 1.2]);
    assert_eq!(result.powers_mw, vec![0.5, 0.5, 0.5]);

    add_to_spreadsheet(&spreadsheet, &result.to_table("vcsel3")).unwrap();
    let table = read_spreadsheet(&spreadsheet).unwrap();
    assert_eq!(table.column_names(), vec!["vcsel3_mA", "vcsel3_V", "vcsel3_mW"]);
    assert_eq!(table.numeric_column("vcsel3_mA").unwrap(), vec![0.0, 10.0, 20.0]);

    let cache = ResourceCache::load(&cache_path).unwrap().unwrap();
    assert_eq!(cache.get("LaserDriver"), Some(LASER));
    assert_eq!(cache.get("OpticalPowerMeter"), Some(METER));

    let transcript = String::from_utf8(prompt.into_output()).unwrap();
    assert!(transcript.contains("0) ASRL/dev/ttyUSB0::INSTR"));
    assert!(transcript.contains(&format!("Only one unopened VISA instrument found: {}.", METER)));
    assert!(transcript.contains("Successfully connected to Arroyo 4302 LaserSource"));
}

#[tokio::test(start_paused = true)]
async fn test_cached_assignment_skips_the_picker() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("cache.json");
    let mut cache = ResourceCache::new(&cache_path);
    cache.insert("LaserDriver", LASER);
    cache.save().unwrap();

    let mut config = ToolsConfig::default();
    config.cache.path = cache_path;

    let backend = MockBackend::new()
        .with_instrument(simulated_laser())
        .with_instrument(simulated_meter());
    let rm = ResourceManager::with_backend(Arc::new(backend));
    let mut prompt = Prompter::new(Cursor::new(Vec::new()), Vec::new());

    let mut laser = LaserDriver::connect(&rm, &mut prompt, LaserOptions::from_config(&config))
        .await
        .unwrap();
    assert_eq!(laser.resource(), LASER);
    laser.close().await.unwrap();

    let transcript = String::from_utf8(prompt.into_output()).unwrap();
    assert!(transcript.contains("Found previous assignment of LaserDriver->ASRL/dev/ttyUSB0::INSTR"));
}
