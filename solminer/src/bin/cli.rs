//! Command-line interface for solminer.
//!
//! This binary provides a CLI for controlling and monitoring the
//! daemon via the HTTP API.

use std::env;

use anyhow::{Result, bail};

use solminer::api_client::{self, types::DevicePatchRequest};
use solminer::power::{NightMode, PowerProfile, SolarMode};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "status" => cmd_status().await?,
        "watts" => cmd_watts(&args[2..]).await?,
        "mode" => cmd_mode(&args[2..]).await?,
        "night" => cmd_night(&args[2..]).await?,
        "profile" => cmd_profile(&args[2..]).await?,
        "board" => cmd_board(&args[2..]).await?,
        "automation" => cmd_automation(&args[2..]).await?,
        "stop" => cmd_stop(&args[2..]).await?,
        "reboot" => cmd_reboot(&args[2..]).await?,
        command => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn usage() {
    eprintln!("Usage: solminer-cli <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status                          Show all devices");
    eprintln!("  watts <device> <watts>          Set available solar watts");
    eprintln!("  mode <device> manual|sun_curve  Set the watt source");
    eprintln!("  night <device> 30|15|standby    Set the night-mode override");
    eprintln!("  profile <device> <profile>      Apply ultra_eco|balanced|max_power");
    eprintln!("  board <device> <index> on|off   Toggle one hashboard");
    eprintln!("  automation <device> on|off      Toggle automation");
    eprintln!("  stop <device>                   Emergency stop");
    eprintln!("  reboot <device>                 Reboot the firmware");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  SOLMINER_API_URL    API base URL (default: http://127.0.0.1:7786)");
}

/// Build an API client, honoring SOLMINER_API_URL if set.
fn make_client() -> api_client::Client {
    match env::var("SOLMINER_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url),
        Err(_) => api_client::Client::new(),
    }
}

fn device_arg(args: &[String]) -> Result<&str> {
    match args.first() {
        Some(device) => Ok(device),
        None => bail!("missing device id"),
    }
}

/// Print a summary of every managed device.
async fn cmd_status() -> Result<()> {
    let client = make_client();
    let devices = client.devices().await?;

    if devices.is_empty() {
        println!("Devices: (none)");
        return Ok(());
    }

    for device in &devices {
        println!("{} ({})", device.id, device.host);
        println!("  Reachable:  {}", device.reachable);
        println!("  Automation: {}", device.automation_enabled);
        if device.emergency_stopped {
            println!("  EMERGENCY STOPPED");
        }

        if let Ok(snapshot) = client.snapshot(&device.id).await {
            match snapshot.hashrate_ths {
                Some(ths) => println!("  Hashrate:   {ths:.1} TH/s"),
                None => println!("  Hashrate:   (unknown)"),
            }
            match snapshot.max_temperature_c {
                Some(temp) => println!("  Max temp:   {temp:.1} C"),
                None => println!("  Max temp:   (unknown)"),
            }
            let boards: Vec<String> = snapshot
                .boards
                .iter()
                .map(|board| {
                    format!("{}:{}", board.index, if board.enabled { "on" } else { "off" })
                })
                .collect();
            if !boards.is_empty() {
                println!("  Boards:     {}", boards.join(" "));
            }
        }

        if let Ok(target) = client.target(&device.id).await {
            println!(
                "  Target:     {} ({:.0} W effective{})",
                if target.target.standby {
                    "standby".to_string()
                } else {
                    target.target.profile.to_string()
                },
                target.effective_watts,
                match target.safety_override {
                    Some(_) => ", safety override",
                    None => "",
                }
            );
        }
    }

    Ok(())
}

async fn cmd_watts(args: &[String]) -> Result<()> {
    let device = device_arg(args)?;
    let watts: f64 = match args.get(1) {
        Some(raw) => raw.parse()?,
        None => bail!("missing watt value"),
    };
    let patch = DevicePatchRequest { solar_watts: Some(watts), ..Default::default() };
    make_client().patch_device(device, &patch).await?;
    println!("{device}: solar watts set to {watts}");
    Ok(())
}

async fn cmd_mode(args: &[String]) -> Result<()> {
    let device = device_arg(args)?;
    let mode = match args.get(1).map(String::as_str) {
        Some("manual") => SolarMode::Manual,
        Some("sun_curve") => SolarMode::SunCurve,
        other => bail!("expected manual|sun_curve, got {other:?}"),
    };
    let patch = DevicePatchRequest { mode: Some(mode), ..Default::default() };
    make_client().patch_device(device, &patch).await?;
    println!("{device}: mode set to {mode}");
    Ok(())
}

async fn cmd_night(args: &[String]) -> Result<()> {
    let device = device_arg(args)?;
    let mode = match args.get(1).map(String::as_str) {
        Some("30") => NightMode::Thirty,
        Some("15") => NightMode::Fifteen,
        Some("standby") => NightMode::Standby,
        other => bail!("expected 30|15|standby, got {other:?}"),
    };
    let patch = DevicePatchRequest { night_mode: Some(mode), ..Default::default() };
    make_client().patch_device(device, &patch).await?;
    println!("{device}: night mode {mode}");
    Ok(())
}

async fn cmd_profile(args: &[String]) -> Result<()> {
    let device = device_arg(args)?;
    let profile: PowerProfile = match args.get(1) {
        Some(raw) => match raw.parse() {
            Ok(profile) => profile,
            Err(_) => bail!("expected ultra_eco|balanced|max_power, got {raw}"),
        },
        None => bail!("missing profile"),
    };
    let patch = DevicePatchRequest { profile: Some(profile), ..Default::default() };
    make_client().patch_device(device, &patch).await?;
    println!("{device}: profile {profile}");
    Ok(())
}

async fn cmd_board(args: &[String]) -> Result<()> {
    let device = device_arg(args)?;
    let index: usize = match args.get(1) {
        Some(raw) => raw.parse()?,
        None => bail!("missing board index"),
    };
    let enabled = match args.get(2).map(String::as_str) {
        Some("on") => true,
        Some("off") => false,
        other => bail!("expected on|off, got {other:?}"),
    };
    make_client().set_board(device, index, enabled).await?;
    println!("{device}: board {index} {}", if enabled { "on" } else { "off" });
    Ok(())
}

async fn cmd_automation(args: &[String]) -> Result<()> {
    let device = device_arg(args)?;
    let enabled = match args.get(1).map(String::as_str) {
        Some("on") => true,
        Some("off") => false,
        other => bail!("expected on|off, got {other:?}"),
    };
    let patch = DevicePatchRequest {
        automation_enabled: Some(enabled),
        ..Default::default()
    };
    make_client().patch_device(device, &patch).await?;
    println!("{device}: automation {}", if enabled { "on" } else { "off" });
    Ok(())
}

async fn cmd_stop(args: &[String]) -> Result<()> {
    let device = device_arg(args)?;
    make_client().emergency_stop(device).await?;
    println!("{device}: EMERGENCY STOP sent");
    Ok(())
}

async fn cmd_reboot(args: &[String]) -> Result<()> {
    let device = device_arg(args)?;
    make_client().reboot(device).await?;
    println!("{device}: reboot sent");
    Ok(())
}
