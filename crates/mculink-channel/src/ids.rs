//! Parameter and command identifiers understood by the controller.
//!
//! The FPGA identifiers (`param::FPGA_TYPE`, `param::FPGA_NEEDS_CONFIGURATION`,
//! `command::FPGA_BITSTREAM_DATA`) are placeholders chosen next to the
//! neighbouring FPGA entries; confirm them against the controller firmware.

/// Parameter identifiers (read/write).
pub mod param {
    pub const MODE: u16 = 0;
    pub const PRODUCT_CODE: u16 = 99;
    pub const SERIAL_NUMBER: u16 = 100;

    pub const INTERNAL_TEMPERATURE: u16 = 201;
    pub const INTERNAL_TEMPERATURE_LIMIT: u16 = 241;
    pub const HUMIDITY: u16 = 270;

    pub const VOLTAGE_PHASE1: u16 = 501;
    pub const VOLTAGE_PHASE2: u16 = 502;
    pub const VOLTAGE_PHASE3: u16 = 503;
    pub const CURRENT_PHASE1: u16 = 507;
    pub const CURRENT_PHASE2: u16 = 508;
    pub const CURRENT_PHASE3: u16 = 509;
    pub const CURRENT_IN_MAXIMUM: u16 = 510;
    pub const CURRENT_IN_MINIMUM: u16 = 511;
    pub const ACTIVE_PHASES: u16 = 512;
    pub const TOTAL_CHARGE_POWER: u16 = 513;
    pub const RELAY_STATE: u16 = 530;

    pub const CHARGE_DURATION: u16 = 701;
    pub const CHARGE_MODE: u16 = 702;
    pub const CHARGE_CURRENT_USER_MAX: u16 = 708;
    pub const SIMPLIFIED_MODE_MAX_CURRENT: u16 = 709;
    pub const CHARGE_OPERATION_MODE: u16 = 710;
    pub const IS_ENABLED: u16 = 711;
    pub const IS_STANDALONE: u16 = 712;
    pub const CABLE_TYPE: u16 = 714;
    pub const NETWORK_TYPE: u16 = 715;
    pub const PERMANENT_CABLE_LOCK: u16 = 716;
    pub const LOCK_CABLE_WHEN_CONNECTED: u16 = 717;

    pub const HMI_BRIGHTNESS: u16 = 800;
    pub const WARNINGS: u16 = 804;
    pub const DIAGNOSTICS_STRING: u16 = 808;
    pub const RESET_SOURCE: u16 = 811;
    /// UART receive errors counted by the controller.
    pub const RX_ERRORS: u16 = 812;
    /// Corrupt frames counted by the controller.
    pub const PACKET_ERRORS: u16 = 813;

    pub const SMART_MAINBOARD_APP_SW_VERSION: u16 = 908;
    pub const SMART_MAINBOARD_BOOT_SW_VERSION: u16 = 909;
    pub const SMART_MAINBOARD_HW_VERSION: u16 = 910;
    pub const SMART_FPGA_VERSION: u16 = 914;
    pub const SMART_FPGA_VERSION_AND_HASH: u16 = 915;
    pub const FPGA_TYPE: u16 = 916;
    pub const FPGA_NEEDS_CONFIGURATION: u16 = 917;
}

/// Command identifiers.
pub mod command {
    pub const SW_REBOOT: u16 = 102;
    pub const RESET: u16 = 103;
    pub const GLOBAL_RESET: u16 = 104;

    pub const UPGRADE_MCU_FIRMWARE: u16 = 204;
    pub const HOST_FW_UPDATE_START: u16 = 205;
    pub const FPGA_FW_UPDATE_START: u16 = 206;
    pub const FPGA_BITSTREAM_DATA: u16 = 207;

    pub const RESET_COMMS_ERRORS: u16 = 260;
    pub const RESET_NOTIFICATIONS: u16 = 261;
    pub const RESET_WARNINGS: u16 = 262;

    pub const VOLTAGE_SNAPSHOT: u16 = 300;

    pub const START_CHARGING: u16 = 501;
    pub const STOP_CHARGING: u16 = 502;
    pub const RESET_SESSION: u16 = 505;
    pub const SET_FINISHED: u16 = 506;
    pub const RESTART_CAR_INTERFACE: u16 = 507;

    pub const AUTHORIZATION_GRANTED: u16 = 601;
    pub const AUTHORIZATION_DENIED: u16 = 602;
    pub const INDICATE_APP_CONNECT: u16 = 603;
    pub const INDICATE_DISABLED: u16 = 604;
    pub const INDICATE_OFFLINE: u16 = 605;
}

/// Look up a parameter or command identifier by its lowercase name, as
/// accepted on the command line (`current_in_maximum`, `upgrade_mcu_firmware`).
pub fn lookup(name: &str) -> Option<u16> {
    PARAMS
        .iter()
        .chain(COMMANDS.iter())
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
}

/// Name of a parameter identifier, if catalogued.
pub fn param_name(id: u16) -> Option<&'static str> {
    PARAMS.iter().find(|(_, v)| *v == id).map(|(n, _)| *n)
}

/// Name of a command identifier, if catalogued.
pub fn command_name(id: u16) -> Option<&'static str> {
    COMMANDS.iter().find(|(_, v)| *v == id).map(|(n, _)| *n)
}

const PARAMS: &[(&str, u16)] = &[
    ("mode", param::MODE),
    ("product_code", param::PRODUCT_CODE),
    ("serial_number", param::SERIAL_NUMBER),
    ("internal_temperature", param::INTERNAL_TEMPERATURE),
    ("internal_temperature_limit", param::INTERNAL_TEMPERATURE_LIMIT),
    ("humidity", param::HUMIDITY),
    ("voltage_phase1", param::VOLTAGE_PHASE1),
    ("voltage_phase2", param::VOLTAGE_PHASE2),
    ("voltage_phase3", param::VOLTAGE_PHASE3),
    ("current_phase1", param::CURRENT_PHASE1),
    ("current_phase2", param::CURRENT_PHASE2),
    ("current_phase3", param::CURRENT_PHASE3),
    ("current_in_maximum", param::CURRENT_IN_MAXIMUM),
    ("current_in_minimum", param::CURRENT_IN_MINIMUM),
    ("active_phases", param::ACTIVE_PHASES),
    ("total_charge_power", param::TOTAL_CHARGE_POWER),
    ("relay_state", param::RELAY_STATE),
    ("charge_duration", param::CHARGE_DURATION),
    ("charge_mode", param::CHARGE_MODE),
    ("charge_current_user_max", param::CHARGE_CURRENT_USER_MAX),
    ("simplified_mode_max_current", param::SIMPLIFIED_MODE_MAX_CURRENT),
    ("charge_operation_mode", param::CHARGE_OPERATION_MODE),
    ("is_enabled", param::IS_ENABLED),
    ("is_standalone", param::IS_STANDALONE),
    ("cable_type", param::CABLE_TYPE),
    ("network_type", param::NETWORK_TYPE),
    ("permanent_cable_lock", param::PERMANENT_CABLE_LOCK),
    ("lock_cable_when_connected", param::LOCK_CABLE_WHEN_CONNECTED),
    ("hmi_brightness", param::HMI_BRIGHTNESS),
    ("warnings", param::WARNINGS),
    ("diagnostics_string", param::DIAGNOSTICS_STRING),
    ("reset_source", param::RESET_SOURCE),
    ("rx_errors", param::RX_ERRORS),
    ("packet_errors", param::PACKET_ERRORS),
    ("smart_mainboard_app_sw_version", param::SMART_MAINBOARD_APP_SW_VERSION),
    ("smart_mainboard_boot_sw_version", param::SMART_MAINBOARD_BOOT_SW_VERSION),
    ("smart_mainboard_hw_version", param::SMART_MAINBOARD_HW_VERSION),
    ("smart_fpga_version", param::SMART_FPGA_VERSION),
    ("smart_fpga_version_and_hash", param::SMART_FPGA_VERSION_AND_HASH),
    ("fpga_type", param::FPGA_TYPE),
    ("fpga_needs_configuration", param::FPGA_NEEDS_CONFIGURATION),
];

const COMMANDS: &[(&str, u16)] = &[
    ("sw_reboot", command::SW_REBOOT),
    ("reset", command::RESET),
    ("global_reset", command::GLOBAL_RESET),
    ("upgrade_mcu_firmware", command::UPGRADE_MCU_FIRMWARE),
    ("host_fw_update_start", command::HOST_FW_UPDATE_START),
    ("fpga_fw_update_start", command::FPGA_FW_UPDATE_START),
    ("fpga_bitstream_data", command::FPGA_BITSTREAM_DATA),
    ("reset_comms_errors", command::RESET_COMMS_ERRORS),
    ("reset_notifications", command::RESET_NOTIFICATIONS),
    ("reset_warnings", command::RESET_WARNINGS),
    ("voltage_snapshot", command::VOLTAGE_SNAPSHOT),
    ("start_charging", command::START_CHARGING),
    ("stop_charging", command::STOP_CHARGING),
    ("reset_session", command::RESET_SESSION),
    ("set_finished", command::SET_FINISHED),
    ("restart_car_interface", command::RESTART_CAR_INTERFACE),
    ("authorization_granted", command::AUTHORIZATION_GRANTED),
    ("authorization_denied", command::AUTHORIZATION_DENIED),
    ("indicate_app_connect", command::INDICATE_APP_CONNECT),
    ("indicate_disabled", command::INDICATE_DISABLED),
    ("indicate_offline", command::INDICATE_OFFLINE),
];
