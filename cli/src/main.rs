// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use itertools::Itertools;
use owo_colors::OwoColorize;
use qdl::event::Event;
use qdl::orchestrator::fastboot::FastbootOrchestrator;
use qdl::orchestrator::mtk::MtkOrchestrator;
use qdl::orchestrator::sprd::SprdOrchestrator;
use qdl::parsers::{firehose_parser_ack_nak, firehose_parser_configure_response};
use qdl::port_detect::detect_all_ports;
use qdl::sahara::{SaharaCmdModeCmd, SaharaMode, sahara_run, sahara_send_hello_rsp};
use qdl::types::{FirehoseConfiguration, FirehoseResetMode, FirehoseStorageType, QdlBackend, QdlDevice};
use qdl::usb;
use qdl::{firehose_configure, firehose_read, firehose_reset};
use qdl::{
    firehose_get_default_sector_size, firehose_nop, firehose_peek, firehose_program_storage,
    firehose_set_bootable, setup_target_device, setup_transport,
};
use util::{
    find_part, print_partition_table, read_gpt_from_storage, read_storage_logical_partition,
};

use std::fs::{self, File};
use std::sync::mpsc;
use std::{path::Path, str::FromStr};

mod flasher;
mod programfile;
mod util;

/// Spawn a background thread that prints orchestrator events as they
/// arrive, so a long-running operation (program/read/erase) shows
/// progress the same way across all four vendor subcommands.
fn spawn_event_printer(rx: mpsc::Receiver<Event>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for event in rx {
            match event {
                Event::StateChanged(s) => println!("{} {:?}", "state:".bright_black(), s),
                Event::Progress { bytes_done, bytes_total, label } => {
                    println!("{}: {}/{}", label, bytes_done, bytes_total)
                }
                Event::Completion { success, message } => {
                    if success {
                        println!("{} {}", "ok:".green(), message)
                    } else {
                        println!("{} {}", "failed:".red(), message)
                    }
                }
                Event::Log(msg) => println!("{}", msg.bright_black()),
            }
        }
    })
}

#[derive(Debug, Subcommand, PartialEq)]
enum QualcommCommand {
    /// Dump the entire storage
    Dump {
        #[arg(short, default_value = "out/")]
        outdir: String,
    },

    /// Dump a single partition
    DumpPart {
        #[arg()]
        name: String,

        #[arg(short, default_value = "out/")]
        outdir: String,
    },

    /// Invoke the flasher
    Flasher {
        #[arg(short, long, num_args = 1..=128, value_name = "FILE")]
        program_file_paths: Vec<String>,

        #[arg(short = 'x', long, num_args = 0..=128, value_name = "FILE")]
        patch_file_paths: Vec<String>,

        #[arg(long, default_value = "false")]
        verbose_flasher: bool,
    },

    /// Erase a partition
    Erase {
        #[arg()]
        name: String,
    },

    /// Ask the device to do nothing, hopefully successfully
    Nop,

    /// Overwrite the storage physical partition contents with a raw image
    /// Similar to Flasher, but this one only takes a partition dump as input
    /// and performs no real validation on the input data
    OverwriteStorage {
        #[arg()]
        file_path: String,
    },

    /// Peek at memory
    Peek {
        #[arg(value_parser=maybe_hex::<u64>)]
        base: u64,

        #[arg(default_value = "1", value_parser=maybe_hex::<u64>)]
        len: u64,
    },

    /// Print the GPT table
    PrintGpt,

    /// Restart the device
    Reset {
        #[arg(default_value = "system", value_name = "edl/off/system")]
        reset_mode: String,
    },

    /// Mark physical storage partition as bootable
    SetBootablePart {
        #[arg()]
        idx: u8,
    },

    /// Write a partition
    Write {
        #[arg()]
        part_name: String,

        #[arg()]
        file_path: String,
    },
}

#[derive(Parser, Debug)]
struct QualcommArgs {
    /// Accept storage r/w operations, but make them never actually execute (useful for testing USB throughput)
    #[arg(long, default_value = "false")]
    bypass_storage: bool,

    #[arg(short, long, value_name = "FILE")]
    loader_path: String,

    #[arg(long, default_value = "false", help = "Validate every packet. Slow.")]
    hash_packets: bool,

    #[arg(
        short = 'L',
        long,
        default_value = "0",
        help = "E.g. LUN index for UFS"
    )]
    phys_part_idx: u8,

    #[arg(long, default_value = "false")]
    print_firehose_log: bool,

    #[arg(
        long,
        default_value = "false",
        help = "Every <program> operation is read back. VERY SLOW!"
    )]
    read_back_verify: bool,

    /// WARNING: Will be deprecated in release v1.0.0
    #[arg(long, default_value = "edl", value_name = "edl/off/system")]
    reset_mode: String,

    #[arg(
        short = 'A',
        long,
        default_value = "false",
        help = "Work around missing HELLO packet"
    )]
    skip_hello_wait: bool,

    #[arg(short, long, value_name = "emmc/ufs/nvme/nand")]
    storage_type: String,

    #[arg(
        short = 'S',
        long,
        default_value = "0",
        help = "Index of the physical device (e.g. 1 for secondary UFS)"
    )]
    storage_slot: u8,

    #[arg(long)]
    sector_size: Option<usize>,

    #[arg(
        long,
        default_value = "false",
        help = "Required for unprovisioned storage media."
    )]
    skip_storage_init: bool,

    #[arg(long, default_value = "false")]
    verbose_sahara: bool,

    #[arg(long, default_value = "false")]
    verbose_firehose: bool,

    #[command(subcommand)]
    command: QualcommCommand,
}

#[derive(Debug, Subcommand, PartialEq)]
enum MtkCommand {
    /// Query and print hw_code/sw_version/target_config from the boot ROM
    Identify,
    /// Write a file to a DA partition
    Write {
        partition: String,
        file_path: String,
    },
    /// Read a DA partition to a file
    Read {
        partition: String,
        offset: u64,
        length: u64,
        out_path: String,
    },
    /// Erase a DA partition
    Erase { partition: String },
    /// Print the raw GPT blob the DA reports
    PrintGpt,
    /// Reboot the device
    Reboot,
}

#[derive(Parser, Debug)]
struct MtkArgs {
    #[arg(short, long, value_name = "FILE", help = "DA (download agent) file")]
    da_path: String,

    #[command(subcommand)]
    command: MtkCommand,
}

#[derive(Debug, Subcommand, PartialEq)]
enum SprdCommand {
    /// Run the BSL handshake, download FDL1+FDL2, then print IMEI/version
    Identify,
    /// Write a file to a named partition
    Write {
        partition: String,
        file_path: String,
    },
    /// Read a partition to a file
    Read {
        partition: String,
        total_len: u32,
        out_path: String,
    },
    /// Erase a named partition
    Erase { partition: String },
    /// Power off the device
    PowerOff,
}

#[derive(Parser, Debug)]
struct SprdArgs {
    #[arg(long, value_name = "FILE")]
    fdl1_path: String,

    #[arg(long, value_parser=maybe_hex::<u32>)]
    fdl1_addr: u32,

    #[arg(long, value_name = "FILE")]
    fdl2_path: String,

    #[arg(long, value_parser=maybe_hex::<u32>)]
    fdl2_addr: u32,

    #[command(subcommand)]
    command: SprdCommand,
}

#[derive(Debug, Subcommand, PartialEq)]
enum FastbootCommand {
    /// Query a bootloader variable
    Getvar { name: String },
    /// Flash an image to a partition, splitting it if it exceeds max-download-size
    Flash {
        partition: String,
        file_path: String,
    },
    /// Erase a partition
    Erase { partition: String },
    /// Reboot into the configured target
    Reboot,
    /// Run an OEM subcommand
    Oem { subcommand: String },
}

#[derive(Parser, Debug)]
struct FastbootArgs {
    #[command(subcommand)]
    command: FastbootCommand,
}

#[derive(Debug, Subcommand)]
enum TopCommand {
    /// List USB/serial ports and the boot-mode protocol each implies
    Detect,
    /// Qualcomm EDL/Firehose
    Qualcomm(Box<QualcommArgs>),
    /// MediaTek boot ROM + download agent
    Mtk(Box<MtkArgs>),
    /// Spreadtrum BSL/FDL
    Sprd(Box<SprdArgs>),
    /// Android Fastboot
    Fastboot(Box<FastbootArgs>),
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, value_name = "usb/serial")]
    backend: Option<String>,

    #[arg(short, long, help = "E.g. COM4 on Windows")]
    dev_path: Option<String>,

    // Only applies to the USB backend
    #[arg(long)]
    serial_no: Option<String>,

    #[command(subcommand)]
    command: TopCommand,
}

fn run_qualcomm(args: QualcommArgs, backend: QdlBackend, serial_no: Option<String>, dev_path: Option<String>) -> Result<()> {
    let reset_mode = FirehoseResetMode::from_str(&args.reset_mode)?;

    let mbn_loader = match fs::read(&args.loader_path) {
        Ok(m) => m,
        Err(e) => bail!("Couldn't open the programmer binary: {}", e.to_string()),
    };

    let mut rw_channel = match setup_target_device(backend, serial_no, dev_path) {
        Ok(c) => c,
        Err(e) => bail!("Couldn't set up device: {}", e.to_string()),
    };
    let mut qdl_dev = QdlDevice {
        rw: rw_channel.as_mut(),
        fh_cfg: FirehoseConfiguration {
            hash_packets: args.hash_packets,
            read_back_verify: args.read_back_verify,
            storage_type: FirehoseStorageType::from_str(&args.storage_type)?,
            storage_sector_size: match args.sector_size {
                Some(n) => n,
                None => {
                    let sector_size = firehose_get_default_sector_size(&args.storage_type);
                    if let Some(m) = sector_size {
                        println!("{} {}", "Using a default sector size of".bright_black(), m);
                        m
                    } else {
                        bail!("Specify storage sector size with --sector-size <n>");
                    }
                }
            },
            storage_slot: args.storage_slot,
            bypass_storage: args.bypass_storage,
            backend,
            skip_firehose_log: !args.print_firehose_log,
            verbose_firehose: args.verbose_firehose,
            // The remaining values are overwritten at runtime through a <configure> handshake
            ..Default::default()
        },
        reset_on_drop: false,
    };

    if args.skip_hello_wait {
        sahara_send_hello_rsp(&mut qdl_dev, SaharaMode::Command)?;
    }

    let sn = sahara_run(
        &mut qdl_dev,
        SaharaMode::Command,
        Some(SaharaCmdModeCmd::ReadSerialNum),
        &mut [],
        vec![],
        args.verbose_sahara,
    )?;
    let sn = u32::from_le_bytes([sn[0], sn[1], sn[2], sn[3]]);
    println!("Chip serial number: 0x{sn:x}");

    let key_hash = sahara_run(
        &mut qdl_dev,
        SaharaMode::Command,
        Some(SaharaCmdModeCmd::ReadOemKeyHash),
        &mut [],
        vec![],
        args.verbose_sahara,
    )?;
    println!(
        "OEM Private Key hash: 0x{:02x}",
        key_hash[..key_hash.len() / 3].iter().format("")
    );

    sahara_run(
        &mut qdl_dev,
        SaharaMode::WaitingForImage,
        None,
        &mut [mbn_loader],
        vec![],
        args.verbose_sahara,
    )?;

    qdl_dev.reset_on_drop = true;

    firehose_read(&mut qdl_dev, firehose_parser_ack_nak)?;
    firehose_configure(&mut qdl_dev, args.skip_storage_init)?;
    firehose_read(&mut qdl_dev, firehose_parser_configure_response)?;

    match args.command {
        QualcommCommand::Dump { outdir } => {
            fs::create_dir_all(&outdir)?;
            let outpath = Path::new(&outdir);

            for (_, p) in
                read_gpt_from_storage(&mut qdl_dev, args.storage_slot, args.phys_part_idx)?.iter()
            {
                if p.partition_name.as_str().is_empty() || p.size()? == 0 {
                    continue;
                }

                let mut out = File::create(outpath.join(p.partition_name.to_string()))?;
                read_storage_logical_partition(
                    &mut qdl_dev,
                    &mut out,
                    &p.partition_name.to_string(),
                    args.storage_slot,
                    args.phys_part_idx,
                )?
            }
        }
        QualcommCommand::DumpPart { name, outdir } => {
            fs::create_dir_all(&outdir)?;
            let outpath = Path::new(&outdir);
            let mut out = File::create(outpath.join(&name))?;

            read_storage_logical_partition(
                &mut qdl_dev,
                &mut out,
                &name,
                args.storage_slot,
                args.phys_part_idx,
            )?
        }
        QualcommCommand::Erase { name } => {
            let part = find_part(&mut qdl_dev, &name, args.storage_slot, args.phys_part_idx)?;

            firehose_program_storage(
                &mut qdl_dev,
                &mut &[0u8][..],
                &name,
                (part.ending_lba - part.starting_lba + 1) as usize,
                args.storage_slot,
                args.phys_part_idx,
                &part.starting_lba.to_string(),
            )?;
        }
        QualcommCommand::Flasher {
            program_file_paths,
            patch_file_paths,
            verbose_flasher,
        } => {
            flasher::run_flash(
                &mut qdl_dev,
                program_file_paths,
                patch_file_paths,
                verbose_flasher,
            )?;
        }
        QualcommCommand::Nop => println!(
            "Your nop was {}",
            firehose_nop(&mut qdl_dev)
                .map(|_| "successful".bright_green())
                .map_err(|_| "unsuccessful".bright_red())
                .unwrap()
        ),
        QualcommCommand::OverwriteStorage { file_path } => {
            let mut file = File::open(file_path)?;
            let file_len_sectors = file
                .metadata()?
                .len()
                .div_ceil(qdl_dev.fh_cfg.storage_sector_size as u64);

            firehose_program_storage(
                &mut qdl_dev,
                &mut file,
                "",
                file_len_sectors as usize,
                args.storage_slot,
                args.phys_part_idx,
                "0",
            )?;
        }
        QualcommCommand::Peek { base, len } => firehose_peek(&mut qdl_dev, base, len)?,
        QualcommCommand::PrintGpt => {
            print_partition_table(&mut qdl_dev, args.storage_slot, args.phys_part_idx)?
        }
        QualcommCommand::Reset { reset_mode } => {
            firehose_reset(&mut qdl_dev, &FirehoseResetMode::from_str(&reset_mode)?, 0)?
        }
        QualcommCommand::SetBootablePart { idx } => firehose_set_bootable(&mut qdl_dev, idx)?,
        QualcommCommand::Write {
            part_name,
            file_path,
        } => {
            let part: gptman::GPTPartitionEntry = find_part(
                &mut qdl_dev,
                &part_name,
                args.storage_slot,
                args.phys_part_idx,
            )?;
            let mut file = File::open(file_path)?;
            let file_len_sectors = file
                .metadata()?
                .len()
                .div_ceil(qdl_dev.fh_cfg.storage_sector_size as u64);
            let part_len_sectors = part.ending_lba - part.starting_lba + 1;

            if file_len_sectors > part_len_sectors {
                bail!(
                    "Partition {} is too small for the specified image ({} > {})",
                    part_name,
                    file_len_sectors,
                    part_len_sectors
                );
            }

            firehose_program_storage(
                &mut qdl_dev,
                &mut file,
                &part_name,
                file_len_sectors as usize,
                args.storage_slot,
                args.phys_part_idx,
                &part.starting_lba.to_string(),
            )?;
        }
    };

    qdl_dev.reset_on_drop = false;
    firehose_reset(&mut qdl_dev, &reset_mode, 0)?;

    println!(
        "{} {}",
        "All went well! Resetting to".green(),
        reset_mode.to_string().bright_yellow()
    );

    Ok(())
}

fn run_mtk(args: MtkArgs, backend: QdlBackend, serial_no: Option<String>, dev_path: Option<String>) -> Result<()> {
    let da_file = fs::read(&args.da_path)?;
    let entries = qdl::mtk::da::parse_da_file(&da_file)?;

    let rw_channel = setup_transport(backend, usb::MTK_VID_PID, serial_no, dev_path)?;
    let qdl_dev = QdlDevice {
        rw: rw_channel,
        fh_cfg: FirehoseConfiguration::default(),
        reset_on_drop: false,
    };

    let (tx, rx) = mpsc::channel();
    let printer = spawn_event_printer(rx);
    let mut orch = MtkOrchestrator::new(qdl_dev, tx);

    let identity = orch.identify()?;
    println!("BROM hw_code: {:#06x}", identity.hw_code);

    let entry = qdl::mtk::da::find_entry_for_chip(&entries, identity.hw_code, 0)
        .ok_or_else(|| anyhow::anyhow!("no DA entry matches hw_code {:#06x}", identity.hw_code))?;
    orch.upload_da(entry)?;

    match args.command {
        MtkCommand::Identify => {}
        MtkCommand::Write { partition, file_path } => {
            let data = fs::read(file_path)?;
            orch.write_partition(&partition, &data)?;
        }
        MtkCommand::Read { partition, offset, length, out_path } => {
            let data = orch.read_partition(&partition, offset, length)?;
            fs::write(out_path, data)?;
        }
        MtkCommand::Erase { partition } => {
            orch.erase_partition(&partition)?;
        }
        MtkCommand::PrintGpt => {
            let gpt = orch.get_gpt()?;
            println!("{} bytes of raw GPT data", gpt.len());
        }
        MtkCommand::Reboot => {
            orch.reboot()?;
        }
    }

    drop(orch);
    let _ = printer.join();
    Ok(())
}

fn run_sprd(args: SprdArgs, backend: QdlBackend, serial_no: Option<String>, dev_path: Option<String>) -> Result<()> {
    let fdl1 = fs::read(&args.fdl1_path)?;
    let fdl2 = fs::read(&args.fdl2_path)?;

    let rw_channel = setup_transport(backend, usb::SPRD_VID_PID, serial_no, dev_path)?;
    let qdl_dev = QdlDevice {
        rw: rw_channel,
        fh_cfg: FirehoseConfiguration::default(),
        reset_on_drop: false,
    };

    let (tx, rx) = mpsc::channel();
    let printer = spawn_event_printer(rx);
    let mut orch = SprdOrchestrator::new(qdl_dev, tx);

    orch.bring_up_fdl1(args.fdl1_addr, &fdl1)?;
    orch.bring_up_fdl2(args.fdl2_addr, &fdl2)?;

    match args.command {
        SprdCommand::Identify => {
            println!("version: {}", orch.get_version()?);
            println!("imei: {}", orch.read_imei()?);
        }
        SprdCommand::Write { partition, file_path } => {
            let data = fs::read(file_path)?;
            orch.write_partition(&partition, &data)?;
        }
        SprdCommand::Read { partition, total_len, out_path } => {
            let data = orch.read_partition(&partition, total_len)?;
            fs::write(out_path, data)?;
        }
        SprdCommand::Erase { partition } => {
            orch.erase_partition(&partition)?;
        }
        SprdCommand::PowerOff => {
            orch.power_off()?;
        }
    }

    drop(orch);
    let _ = printer.join();
    Ok(())
}

fn run_fastboot(args: FastbootArgs, backend: QdlBackend, serial_no: Option<String>, dev_path: Option<String>) -> Result<()> {
    let rw_channel = setup_transport(backend, usb::FASTBOOT_VID_PID, serial_no, dev_path)?;
    let qdl_dev = QdlDevice {
        rw: rw_channel,
        fh_cfg: FirehoseConfiguration::default(),
        reset_on_drop: false,
    };

    let (tx, rx) = mpsc::channel();
    let printer = spawn_event_printer(rx);
    let mut orch = FastbootOrchestrator::new(qdl_dev, tx);

    match args.command {
        FastbootCommand::Getvar { name } => {
            println!("{name}: {}", orch.getvar(&name)?);
        }
        FastbootCommand::Flash { partition, file_path } => {
            let image = fs::read(file_path)?;
            orch.flash_image(&partition, &image)?;
        }
        FastbootCommand::Erase { partition } => {
            orch.erase(&partition)?;
        }
        FastbootCommand::Reboot => {
            orch.reboot()?;
        }
        FastbootCommand::Oem { subcommand } => {
            println!("{}", orch.oem(&subcommand)?);
        }
    }

    drop(orch);
    let _ = printer.join();
    Ok(())
}

fn run_detect() -> Result<()> {
    for port in detect_all_ports() {
        println!(
            "{} {:04x}:{:04x} {} [{:?}]",
            port.port_name.as_deref().unwrap_or("usb"),
            port.vid,
            port.pid,
            port.description,
            port.classified_kind
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let backend = match &args.backend {
        Some(b) => QdlBackend::from_str(b)?,
        None => QdlBackend::default(),
    };

    println!(
        "{} {}",
        env!("CARGO_PKG_NAME").green(),
        env!("CARGO_PKG_VERSION").yellow()
    );

    match args.command {
        TopCommand::Detect => run_detect(),
        TopCommand::Qualcomm(a) => run_qualcomm(*a, backend, args.serial_no, args.dev_path),
        TopCommand::Mtk(a) => run_mtk(*a, backend, args.serial_no, args.dev_path),
        TopCommand::Sprd(a) => run_sprd(*a, backend, args.serial_no, args.dev_path),
        TopCommand::Fastboot(a) => run_fastboot(*a, backend, args.serial_no, args.dev_path),
    }
}
