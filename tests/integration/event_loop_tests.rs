//! Worker cycles against a simulated chip and recording collaborators.

use std::sync::atomic::Ordering;

use stitouch::DeviceConfig;
use stitouch::app::events::StatusEvent;
use stitouch::app::ports::IrqTrigger;
use stitouch::chip::Encoding;
use stitouch::error::BootloaderError;
use stitouch::msg::{
    Audience, Contact, DriverCommand, FusionKind, GROUP_FUSION, OutboundMessage, ToolType,
    TouchFrame,
};

use crate::mock_hw::{BusCall, PlatformCall, ReportCall};
use crate::rig::{CHANNEL, CONTROLLER, Rig, decode, le_bytes, message};

const STATUS: u16 = 0x0010;
const BUF0: u16 = 0x0100;
const BUF1: u16 = 0x0180;
const SCAN: u16 = 0x0020;

fn irq_words(m0: u16, m1: u16, data_len: u16) -> Vec<u16> {
    vec![
        STATUS, BUF0, BUF1, data_len, 0x0004, m0, m1, 0x0007, SCAN, 0x0000, 0x0001, 250,
    ]
}

fn configure_irq(rig: &mut Rig, words: &[u16]) {
    let bytes = le_bytes(words);
    rig.send(
        0,
        &[DriverCommand::ConfigIrq {
            count: words.len() as u8,
            trigger: IrqTrigger::Falling,
            words: &bytes,
        }],
    );
    rig.cycle();
    rig.sim.state().w1c = Some(STATUS);
}

fn async_payload(address: u16, data: &[u16]) -> Vec<u8> {
    let mut p = le_bytes(&[address, (data.len() * 2) as u16]);
    p.extend(le_bytes(data));
    p
}

// ── Request / response ───────────────────────────────────────

#[test]
fn echo_with_seq_zero_is_unicast_to_sender() {
    let mut rig = Rig::new();
    rig.send(0, &[DriverCommand::Echo { cookie: 0xDEAD_BEEF }]);
    rig.cycle();

    let unicasts = rig.bus.unicasts();
    assert_eq!(unicasts.len(), 1);
    let (recipient, wire) = &unicasts[0];
    assert_eq!(*recipient, CONTROLLER);
    let (header, attrs) = decode(wire);
    assert_eq!(header.channel, CHANNEL);
    assert_eq!(header.seq, 1);
    assert_eq!(
        attrs,
        vec![(
            FusionKind::EchoResponse.id(),
            0xDEAD_BEEFu32.to_le_bytes().to_vec()
        )]
    );
    assert!(rig.bus.multicasts().is_empty());
}

#[test]
fn nonzero_seq_reply_goes_to_fusion_group() {
    let mut rig = Rig::new();
    rig.send(17, &[DriverCommand::Echo { cookie: 1 }]);
    rig.send(0, &[DriverCommand::Echo { cookie: 2 }]);
    rig.cycle();

    let multicasts = rig.bus.multicasts();
    assert_eq!(multicasts.len(), 1);
    assert_eq!(multicasts[0].0, GROUP_FUSION);
    assert_eq!(decode(&multicasts[0].1).0.seq, 1);

    // Each flush allocates the next sequence number.
    let unicasts = rig.bus.unicasts();
    assert_eq!(unicasts.len(), 1);
    assert_eq!(decode(&unicasts[0].1).0.seq, 2);
}

#[test]
fn message_without_reply_sends_nothing() {
    let mut rig = Rig::new();
    rig.send(0, &[DriverCommand::ChipReset { state: false }]);
    rig.cycle();
    assert!(rig.bus.unicasts().is_empty());
    assert_eq!(rig.platform.count(&PlatformCall::Reset(false)), 1);
}

#[test]
fn chip_write_then_read_round_trips() {
    let mut rig = Rig::new();
    rig.send(
        0,
        &[
            DriverCommand::ChipWrite {
                address: 0x0200,
                data: &[0x34, 0x12, 0x78, 0x56],
            },
            DriverCommand::ChipRead {
                address: 0x0200,
                length: 4,
            },
        ],
    );
    rig.cycle();

    assert_eq!(rig.sim.word(0x0200), 0x1234);
    assert_eq!(rig.sim.word(0x0201), 0x5678);
    let (_, wire) = &rig.bus.unicasts()[0];
    let (_, attrs) = decode(wire);
    assert_eq!(
        attrs,
        vec![(
            FusionKind::ChipReadResult.id(),
            vec![0x00, 0x02, 0x04, 0x00, 0x34, 0x12, 0x78, 0x56]
        )]
    );
}

#[test]
fn failed_chip_read_keeps_earlier_replies() {
    let mut rig = Rig::new();
    rig.send(
        0,
        &[
            DriverCommand::Echo { cookie: 0x1111_2222 },
            // Odd length cannot be framed.
            DriverCommand::ChipRead {
                address: 0x0200,
                length: 3,
            },
        ],
    );
    rig.cycle();

    let unicasts = rig.bus.unicasts();
    assert_eq!(unicasts.len(), 1);
    let (header, attrs) = decode(&unicasts[0].1);
    assert_eq!(header.seq, 1);
    assert_eq!(
        attrs,
        vec![(
            FusionKind::EchoResponse.id(),
            0x1111_2222u32.to_le_bytes().to_vec()
        )]
    );
}

#[test]
fn failed_chip_read_alone_sends_nothing() {
    let mut rig = Rig::new();
    rig.send(
        0,
        &[DriverCommand::ChipRead {
            address: 0x0200,
            length: 3,
        }],
    );
    rig.cycle();
    assert!(rig.bus.unicasts().is_empty());

    rig.send(0, &[DriverCommand::Echo { cookie: 5 }]);
    rig.cycle();
    let (_, attrs) = decode(&rig.bus.unicasts()[0].1);
    assert_eq!(attrs.len(), 1);
}

#[test]
fn paged_encoding_round_trips_across_pages() {
    let config = DeviceConfig {
        chip_access_method: 2,
        ..DeviceConfig::default()
    };
    let mut rig = Rig::with_config(config);
    let words: Vec<u16> = (0..300u16).map(|i| i.wrapping_mul(0x0101)).collect();
    let data = le_bytes(&words);
    rig.send(
        0,
        &[
            DriverCommand::ChipWrite {
                address: 0x1000,
                data: &data,
            },
            DriverCommand::ChipRead {
                address: 0x1000,
                length: data.len() as u16,
            },
        ],
    );
    rig.cycle();

    assert_eq!(rig.sim.word(0x1000 + 299), words[299]);
    let (_, wire) = &rig.bus.unicasts()[0];
    let (_, attrs) = decode(wire);
    assert_eq!(&attrs[0].1[4..], &data[..]);
}

#[test]
fn select_encoding_rebuilds_transport() {
    let mut rig = Rig::new();
    rig.send(0, &[DriverCommand::SelectEncoding { method: 3 }]);
    rig.cycle();
    assert_eq!(rig.device.encoding(), Encoding::Raw);

    rig.send(0, &[DriverCommand::SelectEncoding { method: 9 }]);
    rig.cycle();
    assert_eq!(rig.device.encoding(), Encoding::Raw);

    rig.sim.state().method = 3;
    rig.send(
        0,
        &[DriverCommand::ChipWrite {
            address: 0x0300,
            data: &[0xCD, 0xAB],
        }],
    );
    rig.cycle();
    assert_eq!(rig.sim.word(0x0300), 0xABCD);
}

#[test]
fn get_irq_line_reports_level() {
    let mut rig = Rig::new();
    rig.platform.assert_irq(true);
    rig.send(0, &[DriverCommand::GetIrqLine]);
    rig.cycle();
    let (_, attrs) = decode(&rig.bus.unicasts()[0].1);
    assert_eq!(attrs, vec![(FusionKind::IrqLineStatus.id(), vec![0])]);
}

#[test]
fn delay_command_sleeps_for_period() {
    let mut rig = Rig::new();
    rig.send(0, &[DriverCommand::Delay { period_us: 1500 }]);
    rig.cycle();
    assert_eq!(rig.delay.sleeps_us(), vec![1500]);
}

// ── Error handling ───────────────────────────────────────────

#[test]
fn malformed_message_purges_backlog() {
    let mut rig = Rig::new();
    let mut bad = message(0, &[DriverCommand::Echo { cookie: 1 }]);
    bad[0] = 0xFF;
    bad[1] = 0x0F;
    rig.send_raw(&bad);
    rig.send(0, &[DriverCommand::Echo { cookie: 2 }]);
    rig.send(0, &[DriverCommand::Echo { cookie: 3 }]);
    assert_eq!(rig.device.link().pending(), 3);

    rig.cycle();
    assert_eq!(rig.device.link().pending(), 0);
    assert!(rig.bus.unicasts().is_empty());

    rig.send(0, &[DriverCommand::Echo { cookie: 4 }]);
    rig.cycle();
    assert_eq!(rig.bus.unicasts().len(), 1);
}

#[test]
fn short_attribute_payload_purges_backlog() {
    let mut rig = Rig::new();
    let mut msg = OutboundMessage::try_new(CHANNEL, 0, 0, 256).unwrap();
    msg.add_attr(1, &[0xAA, 0xBB]).unwrap();
    rig.send_raw(&msg.finish());
    rig.send(0, &[DriverCommand::Echo { cookie: 2 }]);

    rig.cycle();
    assert_eq!(rig.device.link().pending(), 0);
    assert!(rig.bus.unicasts().is_empty());
}

#[test]
fn unknown_command_is_ignored() {
    let mut rig = Rig::new();
    let mut msg = OutboundMessage::try_new(CHANNEL, 0, 0, 256).unwrap();
    msg.add_attr(0x0063, &[1, 2, 3, 4]).unwrap();
    DriverCommand::Echo { cookie: 7 }.encode_into(&mut msg).unwrap();
    rig.send_raw(&msg.finish());

    let mut only_unknown = OutboundMessage::try_new(CHANNEL, 0, 0, 256).unwrap();
    only_unknown.add_attr(0x0063, &[]).unwrap();
    rig.send_raw(&only_unknown.finish());

    rig.cycle();
    let unicasts = rig.bus.unicasts();
    assert_eq!(unicasts.len(), 1);
    let (_, attrs) = decode(&unicasts[0].1);
    assert_eq!(attrs, vec![(FusionKind::EchoResponse.id(), vec![7, 0, 0, 0])]);
}

#[test]
fn send_failure_purges_backlog() {
    let mut rig = Rig::new();
    rig.bus.fail_sends.store(true, Ordering::SeqCst);
    rig.send(0, &[DriverCommand::Echo { cookie: 1 }]);
    rig.send(0, &[DriverCommand::Echo { cookie: 2 }]);

    rig.cycle();
    assert_eq!(rig.bus.unicasts().len(), 1);
    assert_eq!(rig.device.link().pending(), 0);
}

#[test]
fn fusion_audience_is_relayed_verbatim() {
    let mut rig = Rig::new();
    let wire = message(9, &[DriverCommand::Echo { cookie: 5 }]);
    rig.device.link().deliver(Audience::Fusion, &wire).unwrap();
    rig.cycle();

    assert_eq!(rig.bus.multicasts(), vec![(GROUP_FUSION, wire)]);
    assert!(rig.bus.unicasts().is_empty());
}

// ── Broadcast groups ─────────────────────────────────────────

#[test]
fn broadcast_groups_are_bounded_and_registered_once() {
    let mut rig = Rig::new();
    rig.send(
        0,
        &[
            DriverCommand::AddBroadcastGroup {
                number: 5,
                name: "touch",
            },
            DriverCommand::AddBroadcastGroup {
                number: 5,
                name: "touch",
            },
            DriverCommand::AddBroadcastGroup {
                number: 8,
                name: "late",
            },
            DriverCommand::AddBroadcastGroup {
                number: 1,
                name: "fusion",
            },
        ],
    );
    rig.cycle();

    let groups: Vec<_> = rig
        .bus
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            BusCall::RegisterGroup(n, name) => Some((n, name)),
            _ => None,
        })
        .collect();
    assert_eq!(
        groups,
        vec![
            (0, "driver".to_string()),
            (1, "fusion".to_string()),
            (5, "touch".to_string()),
        ]
    );
    assert!(rig.device.group_registered(5));
    assert!(!rig.device.group_registered(8));
}

// ── Companion ────────────────────────────────────────────────

#[test]
fn companion_launch_retries_every_100ms() {
    let mut rig = Rig::new();
    rig.platform.launch_failures.store(3, Ordering::SeqCst);
    rig.device.link().request_companion_start();
    rig.cycle();

    assert_eq!(rig.platform.launches(), 4);
    assert_eq!(rig.delay.sleeps_us(), vec![100_000; 3]);
    assert_eq!(rig.events.events(), vec![StatusEvent::CompanionStarted]);
    assert_eq!(
        rig.platform.calls().last(),
        Some(&PlatformCall::Launch(vec![
            "/system/bin/touch_fusion".to_string(),
            "daemon".to_string(),
            "max1187x".to_string(),
            "/etc/firmware/touch_fusion.cfg".to_string(),
        ]))
    );

    rig.cycle();
    assert_eq!(rig.platform.launches(), 4);
}

// ── Interrupt bridge ─────────────────────────────────────────

#[test]
fn config_irq_registers_once() {
    let mut rig = Rig::new();
    configure_irq(&mut rig, &irq_words(0x0001, 0x0002, 8));
    configure_irq(&mut rig, &irq_words(0x0001, 0x0002, 16));

    assert!(rig.device.irq_registered());
    assert_eq!(
        rig.platform
            .count(&PlatformCall::RequestIrq(IrqTrigger::Falling)),
        1
    );
    assert_eq!(rig.device.irq_params().data_len(), 16);
}

#[test]
fn too_many_irq_params_are_ignored() {
    let mut rig = Rig::new();
    configure_irq(&mut rig, &[0u16; 21]);
    assert!(!rig.device.irq_registered());
    assert!(rig.platform.calls().is_empty());
}

#[test]
fn idle_status_forwards_nothing() {
    let mut rig = Rig::new();
    configure_irq(&mut rig, &irq_words(0x0001, 0x0002, 8));
    rig.platform.assert_irq(true);
    let frames = rig.sim.frame_count();

    rig.cycle();
    assert_eq!(rig.sim.frame_count(), frames + 1);
    assert!(rig.bus.multicasts().is_empty());
    assert!(rig.sim.writes_to(STATUS).is_empty());
    assert_eq!(rig.reports.calls(), vec![ReportCall::Activity]);
}

#[test]
fn line_deasserted_skips_service() {
    let mut rig = Rig::new();
    configure_irq(&mut rig, &irq_words(0x0001, 0x0002, 8));
    rig.sim.set_words(STATUS, &[0x0001]);
    let frames = rig.sim.frame_count();

    rig.cycle();
    assert_eq!(rig.sim.frame_count(), frames);
}

#[test]
fn single_bit_forwards_its_buffer_and_acknowledges() {
    let mut rig = Rig::new();
    configure_irq(&mut rig, &irq_words(0x0001, 0x0002, 8));
    let data = [0x1111, 0x2222, 0x3333, 0x4444];
    rig.sim.set_words(BUF1, &data);
    rig.sim.set_words(STATUS, &[0x0002]);
    rig.platform.assert_irq(true);

    rig.cycle();
    let multicasts = rig.bus.multicasts();
    assert_eq!(multicasts.len(), 1);
    assert_eq!(multicasts[0].0, GROUP_FUSION);
    let (_, attrs) = decode(&multicasts[0].1);
    assert_eq!(
        attrs,
        vec![(FusionKind::AsyncData.id(), async_payload(BUF1, &data))]
    );
    assert_eq!(rig.sim.writes_to(STATUS), vec![vec![0x0002]]);
    assert_eq!(rig.sim.word(STATUS), 0);
}

#[test]
fn both_bits_drain_selector_buffer_first() {
    let mut rig = Rig::new();
    configure_irq(&mut rig, &irq_words(0x0001, 0x0002, 4));
    rig.sim.set_words(BUF0, &[0xA0A0, 0xA1A1]);
    rig.sim.set_words(BUF1, &[0xB0B0, 0xB1B1]);
    rig.sim.set_words(STATUS, &[0x0007]);
    rig.platform.assert_irq(true);

    rig.cycle();
    rig.cycle();
    rig.cycle();

    let addresses: Vec<_> = rig
        .bus
        .multicasts()
        .iter()
        .map(|(_, wire)| {
            let (_, attrs) = decode(wire);
            u16::from_le_bytes([attrs[0].1[0], attrs[0].1[1]])
        })
        .collect();
    assert_eq!(addresses, vec![BUF1, BUF0]);
    assert_eq!(rig.sim.word(STATUS), 0x0004);
}

#[test]
fn both_bits_without_selector_pick_buffer_zero() {
    let mut rig = Rig::new();
    configure_irq(&mut rig, &irq_words(0x0001, 0x0002, 4));
    rig.sim.set_words(STATUS, &[0x0003]);
    rig.platform.assert_irq(true);

    rig.cycle();
    let (_, attrs) = decode(&rig.bus.multicasts()[0].1);
    assert_eq!(&attrs[0].1[..2], &BUF0.to_le_bytes());
    assert_eq!(rig.sim.writes_to(STATUS), vec![vec![0x0001]]);
}

#[test]
fn invalid_combination_is_acknowledged_without_data() {
    let mut rig = Rig::new();
    configure_irq(&mut rig, &irq_words(0x0003, 0x000C, 4));
    rig.sim.set_words(STATUS, &[0x0001]);
    rig.platform.assert_irq(true);

    rig.cycle();
    assert!(rig.bus.multicasts().is_empty());
    assert_eq!(rig.sim.writes_to(STATUS), vec![vec![0x0001]]);
    assert_eq!(rig.sim.word(STATUS), 0);
}

#[test]
fn failed_data_read_still_acknowledges() {
    let mut rig = Rig::new();
    // Odd length cannot be framed.
    configure_irq(&mut rig, &irq_words(0x0001, 0x0002, 7));
    rig.sim.set_words(STATUS, &[0x0001]);
    rig.platform.assert_irq(true);

    rig.cycle();
    assert!(rig.bus.multicasts().is_empty());
    assert_eq!(rig.sim.writes_to(STATUS), vec![vec![0x0001]]);

    // The discarded attribute does not leak into the next reply.
    rig.platform.assert_irq(false);
    rig.send(0, &[DriverCommand::Echo { cookie: 9 }]);
    rig.cycle();
    let (_, attrs) = decode(&rig.bus.unicasts()[0].1);
    assert_eq!(attrs.len(), 1);
}

// ── Reporting ────────────────────────────────────────────────

#[test]
fn touch_frames_become_sink_calls() {
    let mut rig = Rig::new();
    let finger = Contact {
        id: 0,
        tool: ToolType::Finger,
        x: 10,
        y: 20,
        pressure: 30,
    };
    let eraser = Contact {
        id: 1,
        tool: ToolType::Eraser,
        x: 40,
        y: 50,
        pressure: 60,
    };
    let frame: TouchFrame = [finger, eraser].into_iter().collect();

    rig.send(0, &[DriverCommand::ReportTouchFrame(frame.clone())]);
    rig.cycle();
    assert!(rig.reports.calls().is_empty());

    rig.send(
        0,
        &[
            DriverCommand::ConfigReporting {
                x_range: 1080,
                y_range: 1920,
            },
            DriverCommand::ReportTouchFrame(frame),
            DriverCommand::ReportTouchFrame(TouchFrame::new()),
        ],
    );
    rig.cycle();
    assert_eq!(
        rig.reports.calls(),
        vec![
            ReportCall::Configure(1080, 1920),
            ReportCall::Contact(finger),
            ReportCall::Eraser(true),
            ReportCall::Contact(eraser),
            ReportCall::Sync,
            ReportCall::Eraser(false),
            ReportCall::Sync,
        ]
    );
    assert!(rig.device.reporting());
}

#[test]
fn unknown_tool_is_still_reported() {
    let mut rig = Rig::new();
    let odd = Contact {
        id: 3,
        tool: ToolType::Unknown(7),
        x: 1,
        y: 2,
        pressure: 3,
    };
    let frame: TouchFrame = [odd].into_iter().collect();
    rig.send(
        0,
        &[
            DriverCommand::ConfigReporting {
                x_range: 100,
                y_range: 100,
            },
            DriverCommand::ReportTouchFrame(frame),
        ],
    );
    rig.cycle();
    assert_eq!(
        rig.reports.reports(),
        vec![
            ReportCall::Configure(100, 100),
            ReportCall::Contact(odd),
            ReportCall::Sync,
        ]
    );
}

#[test]
fn deconfig_releases_everything_and_halts_sensing() {
    let mut rig = Rig::new();
    configure_irq(&mut rig, &irq_words(0x0001, 0x0002, 8));
    rig.send(
        0,
        &[DriverCommand::ConfigReporting {
            x_range: 100,
            y_range: 100,
        }],
    );
    rig.cycle();

    rig.send(0, &[DriverCommand::Deconfig]);
    rig.cycle();

    assert_eq!(rig.reports.reports().last(), Some(&ReportCall::Release));
    assert!(!rig.device.reporting());
    assert!(!rig.device.irq_registered());
    assert_eq!(rig.platform.count(&PlatformCall::FreeIrq), 1);
    assert_eq!(rig.sim.writes_to(SCAN), vec![vec![0x0000]]);
    assert_eq!(rig.sim.writes_to(STATUS), vec![vec![0x0007], vec![0x0007]]);
    assert_eq!(rig.delay.sleeps_us(), vec![250]);
}

// ── Firmware ─────────────────────────────────────────────────

#[test]
fn legacy_download_with_wrong_size_touches_no_bus() {
    let mut rig = Rig::new();
    configure_irq(&mut rig, &irq_words(0x0001, 0x0002, 8));
    *rig.platform.firmware.lock().unwrap() = Some(vec![0u8; 1024]);
    let frames = rig.sim.frame_count();

    rig.send(0, &[DriverCommand::LegacyFirmwareDownload]);
    rig.cycle();

    assert_eq!(rig.sim.frame_count(), frames);
    assert_eq!(
        rig.events.events(),
        vec![StatusEvent::FirmwareFailed(BootloaderError::InvalidImageSize(1024))]
    );
    let calls = rig.platform.calls();
    let tail = &calls[calls.len() - 3..];
    assert_eq!(
        tail,
        &[
            PlatformCall::RequestFirmware("maxim_fp35.bin".to_string()),
            PlatformCall::DisableIrq,
            PlatformCall::EnableIrq,
        ]
    );
}

#[test]
fn missing_firmware_is_logged_only() {
    let mut rig = Rig::new();
    rig.send(0, &[DriverCommand::LegacyFirmwareDownload]);
    rig.cycle();
    assert!(rig.events.events().is_empty());
    assert_eq!(rig.sim.frame_count(), 0);
}

// ── Teardown ─────────────────────────────────────────────────

#[test]
fn teardown_releases_in_order() {
    let mut rig = Rig::new();
    configure_irq(&mut rig, &irq_words(0x0001, 0x0002, 8));
    rig.send(
        0,
        &[DriverCommand::ConfigReporting {
            x_range: 1,
            y_range: 1,
        }],
    );
    rig.cycle();
    rig.send(0, &[DriverCommand::Echo { cookie: 1 }]);

    let link = std::sync::Arc::clone(rig.device.link());
    rig.device.teardown();

    assert_eq!(link.pending(), 0);
    assert_eq!(rig.bus.calls().last(), Some(&BusCall::Unregister));
    assert_eq!(rig.reports.reports().last(), Some(&ReportCall::Release));
    assert_eq!(rig.platform.calls().last(), Some(&PlatformCall::FreeIrq));
    assert_eq!(rig.sim.writes_to(SCAN), vec![vec![0x0000]]);
}
