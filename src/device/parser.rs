/// Telemetry line decoding for the UD-CO2S stream
use regex::Regex;
use std::sync::LazyLock;

use crate::error::ParseError;
use crate::models::Reading;

/// Telemetry lines look like `CO2=812,HUM=54.3,TMP=23.1`, possibly with
/// extra text around them
static TELEMETRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"CO2=(\d+),HUM=([\d.]+),TMP=([\d.-]+)").expect("telemetry pattern is valid")
});

/// Decode one telemetry line
///
/// No range checks and no unit conversion are applied; values are passed
/// through exactly as the device reported them. Control lines such as
/// `OK STP` must be filtered out by the caller before calling this.
pub fn parse(line: &str) -> Result<Reading, ParseError> {
    let caps = TELEMETRY.captures(line).ok_or(ParseError::NoMatch)?;

    let co2 = caps[1]
        .parse::<u32>()
        .map_err(|_| ParseError::InvalidNumber("co2"))?;
    let humidity = caps[2]
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber("humidity"))?;
    let temperature = caps[3]
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber("temperature"))?;

    Ok(Reading {
        co2,
        temperature,
        humidity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        assert_eq!(
            parse("CO2=812,HUM=54.3,TMP=23.1"),
            Ok(Reading {
                co2: 812,
                humidity: 54.3,
                temperature: 23.1,
            })
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse("garbage"), Err(ParseError::NoMatch));
        assert_eq!(parse(""), Err(ParseError::NoMatch));
        assert_eq!(parse("OK STP"), Err(ParseError::NoMatch));
    }

    #[test]
    fn pattern_is_not_anchored() {
        let reading = parse("> CO2=1500,HUM=40.0,TMP=-3.5 <").unwrap();
        assert_eq!(reading.co2, 1500);
        assert_eq!(reading.temperature, -3.5);
    }

    #[test]
    fn implausible_values_pass_through() {
        let reading = parse("CO2=0,HUM=150.0,TMP=99.9").unwrap();
        assert_eq!(reading.co2, 0);
        assert_eq!(reading.humidity, 150.0);
    }

    #[test]
    fn structural_match_with_bad_number_names_the_field() {
        assert_eq!(
            parse("CO2=400,HUM=5.0.1,TMP=20.0"),
            Err(ParseError::InvalidNumber("humidity"))
        );
        assert_eq!(
            parse("CO2=400,HUM=50.0,TMP=2-0"),
            Err(ParseError::InvalidNumber("temperature"))
        );
        assert_eq!(
            parse("CO2=99999999999,HUM=50.0,TMP=20.0"),
            Err(ParseError::InvalidNumber("co2"))
        );
    }
}
