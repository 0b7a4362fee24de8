//! dsPIC update runs against a simulated controller and bootloader.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mculink_channel::ids::{command, param};
use mculink_channel::sim::{DeviceSim, SimReply};
use mculink_channel::{ChannelConfig, ProtocolEngine};
use mculink_frame::{Message, MessageType};
use mculink_update::dspic::{bootloader, PAGE_SIZE};
use mculink_update::{
    DspicUpdater, FirmwareImage, Supervisor, UpdateError, UpdateOutcome, UpdatePolicy,
    VersionPrefix,
};

#[derive(Debug, Default)]
struct Controller {
    in_bootloader: bool,
    /// Bootloader ignores parameter reads instead of answering them.
    silent_bootloader: bool,
    running_version: String,
    flashed_version: String,
    erased: bool,
    pages: Vec<u32>,
    header: Option<Vec<u8>>,
    /// Reject the page at this index (counted from the last erase).
    reject_page: Option<(usize, u8)>,
    /// START_APP fails until an image header has been written.
    refuse_start_until_flashed: bool,
}

impl Controller {
    fn app(version: &str, flashed: &str) -> Self {
        Self {
            running_version: version.to_owned(),
            flashed_version: flashed.to_owned(),
            ..Self::default()
        }
    }

    fn respond(&mut self, req: &Message) -> SimReply {
        match (req.kind, self.in_bootloader) {
            (MessageType::Read, false) => match req.identifier {
                param::MODE => Message::reply_to(req, vec![1u8]).into(),
                param::SMART_MAINBOARD_APP_SW_VERSION => {
                    let mut value = self.running_version.clone().into_bytes();
                    value.push(0);
                    Message::reply_to(req, value).into()
                }
                _ => SimReply::Silence,
            },
            (MessageType::Read, true) if self.silent_bootloader => SimReply::Silence,
            (MessageType::Read, true) => {
                SimReply::Reply(Message::new(MessageType::FirmwareAck, 0, vec![0u8]))
            }
            (MessageType::Command, false) if req.identifier == command::UPGRADE_MCU_FIRMWARE => {
                self.in_bootloader = true;
                Message::ack_for(req, 0).into()
            }
            (MessageType::Firmware, true) => {
                let code = self.bootloader_command(&req.payload);
                Message::ack_for(req, code).into()
            }
            _ => SimReply::Silence,
        }
    }

    fn bootloader_command(&mut self, payload: &[u8]) -> u8 {
        match payload[0] {
            bootloader::READ_ID => 0,
            bootloader::APP_DELETE => {
                self.erased = true;
                self.header = None;
                self.pages.clear();
                0
            }
            bootloader::WRITE_PM => {
                let address = u32::from_le_bytes(payload[1..5].try_into().unwrap());
                assert_eq!(payload.len(), 5 + PAGE_SIZE);
                let index = self.pages.len();
                self.pages.push(address);
                match self.reject_page {
                    Some((at, code)) if at == index => code,
                    _ => 0,
                }
            }
            bootloader::WRITE_HEADER => {
                self.header = Some(payload.to_vec());
                0
            }
            bootloader::START_APP => {
                if (self.erased || self.refuse_start_until_flashed) && self.header.is_none() {
                    return 1;
                }
                if self.header.is_some() {
                    self.running_version = self.flashed_version.clone();
                }
                self.in_bootloader = false;
                0
            }
            _ => 1,
        }
    }
}

fn image(version: &str, pages: usize) -> FirmwareImage {
    let mut blob = version.as_bytes().to_vec();
    blob.push(0);
    blob.extend((0..pages * PAGE_SIZE).map(|i| (i % 251) as u8 + 1));
    FirmwareImage::parse(blob, PAGE_SIZE, VersionPrefix::NulTerminated).unwrap()
}

fn policy(max_attempts: u32) -> UpdatePolicy {
    UpdatePolicy {
        max_attempts,
        attempt_timeout: Duration::from_secs(10),
        backoff_step: Duration::from_millis(10),
        join_grace: Duration::from_millis(100),
        boot_delay: Duration::from_millis(5),
        bootloader_confirm_tries: 3,
    }
}

fn start(controller: Controller) -> (ProtocolEngine, DeviceSim, Arc<Mutex<Controller>>) {
    let shared = Arc::new(Mutex::new(controller));
    let device = Arc::clone(&shared);
    let responder = move |req: &Message| device.lock().unwrap().respond(req);
    let config = ChannelConfig::default().with_reply_timeout(Duration::from_millis(100));
    let (engine, sim) = DeviceSim::attach(responder, config).unwrap();
    (engine, sim, shared)
}

fn firmware_commands(sim: &DeviceSim) -> Vec<u8> {
    sim.received()
        .iter()
        .filter(|m| m.kind == MessageType::Firmware)
        .map(|m| m.payload[0])
        .collect()
}

#[test]
fn current_firmware_is_left_alone() {
    let (engine, sim, _controller) = start(Controller::app("2.0.0", "2.0.0"));
    let updater = DspicUpdater::new(image("2.0.0", 2)).unwrap();

    let report = Supervisor::with_policy(updater, engine, policy(1)).run().unwrap();

    assert_eq!(report.outcome, UpdateOutcome::AlreadyCurrent);
    assert!(firmware_commands(&sim).is_empty());
}

#[test]
fn outdated_firmware_is_replaced_page_by_page() {
    let (engine, sim, controller) = start(Controller::app("1.0.0", "2.0.0"));
    let image = image("2.0.0", 4);
    let crc = image.crc32();
    let updater = DspicUpdater::new(image).unwrap();

    let report = Supervisor::with_policy(updater, engine, policy(1)).run().unwrap();
    assert_eq!(report.outcome, UpdateOutcome::Updated);
    assert_eq!(report.attempts.len(), 1);

    let controller = controller.lock().unwrap();
    assert_eq!(controller.pages, vec![0x3C00, 0x3C20, 0x3C40, 0x3C60]);
    assert_eq!(controller.running_version, "2.0.0");

    let header = controller.header.as_ref().unwrap();
    assert_eq!(&header[2..6], &256u32.to_le_bytes());
    assert_eq!(&header[6..10], &crc.to_le_bytes());

    assert_eq!(
        firmware_commands(&sim),
        vec![
            bootloader::READ_ID,
            bootloader::APP_DELETE,
            bootloader::WRITE_PM,
            bootloader::WRITE_PM,
            bootloader::WRITE_PM,
            bootloader::WRITE_PM,
            bootloader::WRITE_HEADER,
            bootloader::START_APP,
        ]
    );
}

#[test]
fn rejected_page_aborts_transfer_and_retries_from_erase() {
    let mut controller = Controller::app("1.0.0", "2.0.0");
    controller.reject_page = Some((1, 7));
    let (engine, sim, controller) = start(controller);
    let updater = DspicUpdater::new(image("2.0.0", 5)).unwrap();

    let err = Supervisor::with_policy(updater, engine, policy(2))
        .run()
        .unwrap_err();
    let UpdateError::RetriesExhausted(report) = err else {
        panic!("expected exhausted retries");
    };
    assert_eq!(report.attempts.len(), 2);
    assert!(report.attempts[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("code 7")));

    // Each attempt erases, then stops right after the rejected second page.
    let commands = firmware_commands(&sim);
    let pages_per_erase: Vec<usize> = commands
        .split(|&c| c == bootloader::APP_DELETE)
        .skip(1)
        .map(|run| run.iter().filter(|&&c| c == bootloader::WRITE_PM).count())
        .collect();
    assert_eq!(pages_per_erase, vec![2, 2]);
    assert!(!commands.contains(&bootloader::WRITE_HEADER));
    assert_eq!(controller.lock().unwrap().running_version, "1.0.0");
}

#[test]
fn silent_bootloader_is_found_by_probe() {
    let mut controller = Controller::app("1.0.0", "2.0.0");
    controller.in_bootloader = true;
    controller.silent_bootloader = true;
    let (engine, sim, controller) = start(controller);
    let updater = DspicUpdater::new(image("2.0.0", 1)).unwrap();

    let report = Supervisor::with_policy(updater, engine, policy(1)).run().unwrap();

    assert_eq!(report.outcome, UpdateOutcome::Updated);
    assert_eq!(firmware_commands(&sim)[0], bootloader::READ_ID);
    assert_eq!(controller.lock().unwrap().running_version, "2.0.0");
}

#[test]
fn firmware_ack_to_mode_read_means_bootloader() {
    let mut controller = Controller::app("2.0.0", "2.0.0");
    controller.in_bootloader = true;
    let (engine, sim, controller) = start(controller);
    let updater = DspicUpdater::new(image("2.0.0", 2)).unwrap();

    let report = Supervisor::with_policy(updater, engine, policy(1)).run().unwrap();

    // The bootloader answered the mode read, so no id probe is needed.
    assert_eq!(report.outcome, UpdateOutcome::AlreadyCurrent);
    assert_eq!(firmware_commands(&sim), vec![bootloader::START_APP]);
    assert!(!controller.lock().unwrap().in_bootloader);
}

#[test]
fn bootloader_that_cannot_start_app_is_reprogrammed() {
    let mut controller = Controller::app("1.0.0", "2.0.0");
    controller.in_bootloader = true;
    controller.refuse_start_until_flashed = true;
    let (engine, sim, controller) = start(controller);
    let updater = DspicUpdater::new(image("2.0.0", 2)).unwrap();

    let report = Supervisor::with_policy(updater, engine, policy(1)).run().unwrap();

    assert_eq!(report.outcome, UpdateOutcome::Updated);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(
        firmware_commands(&sim),
        vec![
            bootloader::START_APP,
            bootloader::APP_DELETE,
            bootloader::WRITE_PM,
            bootloader::WRITE_PM,
            bootloader::WRITE_HEADER,
            bootloader::START_APP,
        ]
    );
    assert_eq!(controller.lock().unwrap().running_version, "2.0.0");
}

#[test]
fn compatibility_code_accepted_at_its_address() {
    let mut controller = Controller::app("1.0.0", "2.0.0");
    controller.reject_page = Some((1952, 16));
    let (engine, _sim, controller) = start(controller);
    let updater = DspicUpdater::new(image("2.0.0", 1954)).unwrap();

    let report = Supervisor::with_policy(updater, engine, policy(1)).run().unwrap();

    assert_eq!(report.outcome, UpdateOutcome::Updated);
    let controller = controller.lock().unwrap();
    assert_eq!(controller.pages.len(), 1954);
    assert_eq!(controller.pages[1952], 0x13000);
    assert!(controller.header.is_some());
    assert_eq!(controller.running_version, "2.0.0");
}

#[test]
fn compatibility_code_rejected_elsewhere() {
    let mut controller = Controller::app("1.0.0", "2.0.0");
    controller.reject_page = Some((3, 16));
    let (engine, sim, controller) = start(controller);
    let updater = DspicUpdater::new(image("2.0.0", 6)).unwrap();

    let err = Supervisor::with_policy(updater, engine, policy(1))
        .run()
        .unwrap_err();
    assert!(matches!(err, UpdateError::RetriesExhausted(_)));

    let commands = firmware_commands(&sim);
    let written = commands
        .iter()
        .filter(|&&c| c == bootloader::WRITE_PM)
        .count();
    assert_eq!(written, 4);
    assert!(!commands.contains(&bootloader::WRITE_HEADER));
    assert_eq!(controller.lock().unwrap().running_version, "1.0.0");
}
