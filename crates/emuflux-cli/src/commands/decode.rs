//! `emuflux decode`: decode raw EMU fields by hand.

use emuflux_core::{DecodeError, decode_price, decode_reading, decode_timestamp};

pub fn timestamp(raw: Option<&str>) {
    match decode_timestamp(raw) {
        Ok(ts) => println!("{}", ts.to_rfc3339()),
        Err(e) => fail(&e),
    }
}

pub fn reading(raw: &str, multiplier: &str, divisor: &str) {
    match decode_reading(raw, multiplier, divisor) {
        Ok(v) => println!("{v}"),
        Err(e) => fail(&e),
    }
}

pub fn price(price: &str, trailing_digits: &str) {
    match decode_price(price, trailing_digits) {
        Ok(v) => println!("{v}"),
        Err(e) => fail(&e),
    }
}

fn fail(e: &DecodeError) -> ! {
    eprintln!("Error: {e}");
    std::process::exit(1);
}
