//! Viewpoint scripts: a plain text list of camera moves, lens changes and captures.
//!
//! ```text
//! # orbit the front of the model
//! distortion -0.1 0.01
//! look_at 0 0 5  0 0 0  0 1 0
//! capture
//! ```

use cgmath::{Point3, Vector3};
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{space0, space1};
use nom::combinator::{all_consuming, map};
use nom::number::complete::double;
use nom::sequence::{preceded, terminated, tuple};
use nom::IResult;

use std::path::Path;

use crate::camera::{Distortion, Viewpoint};
use crate::Error;

/// One line of a viewpoint script.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Move the renderer's camera.
    LookAt(Viewpoint),
    /// Lens used by subsequent captures.
    Distortion(Distortion),
    /// Take a photo in the session's mode.
    Capture,
}

fn command(input: &str) -> IResult<&str, Command> {
    fn number(input: &str) -> IResult<&str, f64> {
        preceded(space1, double)(input)
    }

    fn triple(input: &str) -> IResult<&str, (f64, f64, f64)> {
        tuple((number, number, number))(input)
    }

    let look_at = map(
        preceded(tag("look_at"), tuple((triple, triple, triple))),
        |(e, t, u)| {
            Command::LookAt(Viewpoint::new(
                Point3::new(e.0, e.1, e.2),
                Point3::new(t.0, t.1, t.2),
                Vector3::new(u.0, u.1, u.2),
            ))
        },
    );
    let distortion = map(
        preceded(tag("distortion"), tuple((number, number))),
        |(k1, k2)| Command::Distortion(Distortion::new(k1, k2)),
    );
    let capture = map(tag("capture"), |_| Command::Capture);

    all_consuming(terminated(
        preceded(space0, alt((look_at, distortion, capture))),
        space0,
    ))(input)
}

/// Parse a script. Lines are trimmed, blank lines and everything after a `#` are ignored.
pub fn parse_script(script: &str) -> Result<Vec<Command>, Error> {
    let mut commands = Vec::new();
    for (i, line) in script.lines().enumerate() {
        let line = match line.find('#') {
            Some(c) => &line[..c],
            None => line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }
        let (_, c) = command(line).map_err(|_| {
            Error::ParseError(format!("line {}: cannot parse \"{}\"", i + 1, line))
        })?;
        commands.push(c);
    }
    Ok(commands)
}

/// Read and parse a script file.
pub fn load_script(path: &Path) -> Result<Vec<Command>, Error> {
    let script = std::fs::read_to_string(path)?;
    parse_script(&script).map_err(|e| match e {
        Error::ParseError(msg) => Error::ParseError(format!("{}: {}", path.display(), msg)),
        e => e,
    })
}

#[test]
fn test_parse_script() {
    let script = "\
        # two views\n\
        distortion -0.1 0.01\n\
        \n\
        look_at 0 0 5  0 0 0  0 1 0   # front\n\
        capture\n\
        look_at 5 0 0 0 0 0 0 1 0\n\
        capture\n";
    let commands = parse_script(script).unwrap();
    assert_eq!(commands.len(), 5);
    assert_eq!(
        commands[0],
        Command::Distortion(Distortion::new(-0.1, 0.01))
    );
    assert_eq!(
        commands[1],
        Command::LookAt(Viewpoint::new(
            Point3::new(0.0, 0.0, 5.0),
            Point3::new(0.0, 0.0, 0.0),
            Vector3::unit_y()
        ))
    );
    assert_eq!(commands[2], Command::Capture);
    assert_eq!(commands[4], Command::Capture);
}

#[test]
fn test_parse_error_reports_line() {
    let err = parse_script("capture\nlook_at 1 2 3\n").unwrap_err();
    match err {
        Error::ParseError(msg) => assert!(msg.starts_with("line 2:"), "{}", msg),
        e => panic!("unexpected error {:?}", e),
    }
    assert!(parse_script("capture now").is_err());
    assert!(parse_script("zoom 2").is_err());
}
