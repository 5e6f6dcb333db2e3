#![no_main]
use libfuzzer_sys::fuzz_target;
use wallbox_bridge::driver::setpoint::parse_setpoint_payload;

fuzz_target!(|data: &[u8]| {
    // Any accepted payload must encode into one register
    if let Ok(value) = parse_setpoint_payload(data) {
        assert_eq!(u32::from(value.register_value()), u32::from(value.amps()) * 10);
        assert_eq!(value.to_string().parse::<u16>().ok(), Some(value.amps()));
    }
});
