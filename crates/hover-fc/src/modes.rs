//! ArduCopter custom flight modes (the `custom_mode` field of HEARTBEAT and
//! param2 of `MAV_CMD_DO_SET_MODE`).

const COPTER_MODES: &[(&str, u32)] = &[
    ("STABILIZE", 0),
    ("ACRO", 1),
    ("ALT_HOLD", 2),
    ("AUTO", 3),
    ("GUIDED", 4),
    ("LOITER", 5),
    ("RTL", 6),
    ("CIRCLE", 7),
    ("LAND", 9),
    ("DRIFT", 11),
    ("SPORT", 13),
    ("FLIP", 14),
    ("AUTOTUNE", 15),
    ("POSHOLD", 16),
    ("BRAKE", 17),
    ("THROW", 18),
    ("AVOID_ADSB", 19),
    ("GUIDED_NOGPS", 20),
    ("SMART_RTL", 21),
    ("FLOWHOLD", 22),
    ("FOLLOW", 23),
    ("ZIGZAG", 24),
    ("SYSTEMID", 25),
    ("AUTOROTATE", 26),
    ("AUTO_RTL", 27),
];

/// Mode number for a mode name, case-insensitive.
pub fn custom_mode(name: &str) -> Option<u32> {
    let name = name.trim();
    COPTER_MODES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, m)| *m)
}

pub fn mode_name(custom_mode: u32) -> Option<&'static str> {
    COPTER_MODES.iter().find(|(_, m)| *m == custom_mode).map(|(n, _)| *n)
}
