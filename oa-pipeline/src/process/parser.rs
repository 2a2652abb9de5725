use std::collections::{
    BTreeMap,
    HashMap,
};

use crate::transport::OpenMxHelp;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ParsedSample {
    pub(crate) name: String,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) value: f64,
    pub(crate) timestamp: Option<i64>,
}

// Line-oriented parse of the Prometheus text exposition format.  HELP and
// TYPE comments merge into one help record per unique metric; any other
// comment is noise; a malformed sample line discards only itself.
pub(crate) fn parse_exposition(body: &str) -> (Vec<ParsedSample>, Vec<OpenMxHelp>) {
    let mut samples = vec![];
    let mut helps: Vec<OpenMxHelp> = vec![];
    let mut help_index: HashMap<String, usize> = HashMap::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("# HELP ") {
            if let Some((name, text)) = split_metric_comment(rest) {
                help_entry(&mut helps, &mut help_index, name).help = text.to_string();
            }
        } else if let Some(rest) = line.strip_prefix("# TYPE ") {
            if let Some((name, mx_type)) = split_metric_comment(rest) {
                help_entry(&mut helps, &mut help_index, name).mx_type = mx_type.to_string();
            }
        } else if line.starts_with('#') {
            continue;
        } else if let Some(sample) = parse_sample(line) {
            samples.push(sample);
        }
    }

    (samples, helps)
}

fn help_entry<'a>(helps: &'a mut Vec<OpenMxHelp>, index: &mut HashMap<String, usize>, name: &str) -> &'a mut OpenMxHelp {
    let i = *index.entry(name.to_string()).or_insert_with(|| {
        helps.push(OpenMxHelp {
            name: name.to_string(),
            help: String::new(),
            mx_type: String::new(),
        });
        helps.len() - 1
    });
    &mut helps[i]
}

fn split_metric_comment(rest: &str) -> Option<(&str, &str)> {
    let rest = rest.trim();
    match rest.split_once(char::is_whitespace) {
        Some((name, text)) => Some((name, text.trim())),
        None if !rest.is_empty() => Some((rest, "")),
        None => None,
    }
}

// name{label="value",...} value [timestamp]
fn parse_sample(line: &str) -> Option<ParsedSample> {
    let name_end = line.find(|c: char| c == '{' || c.is_whitespace()).unwrap_or(line.len());
    let name = &line[..name_end];
    if name.is_empty() {
        return None;
    }

    let mut rest = line[name_end..].trim_start();
    let mut labels = BTreeMap::new();
    if let Some(after_brace) = rest.strip_prefix('{') {
        rest = parse_labels(after_brace, &mut labels)?;
    }

    let mut parts = rest.split_whitespace();
    let value: f64 = parts.next()?.parse().ok()?;
    let timestamp = match parts.next() {
        Some(raw) => Some(raw.parse::<i64>().ok()?),
        None => None,
    };

    Some(ParsedSample { name: name.to_string(), labels, value, timestamp })
}

// Quoted label values understand the three standard escapes: \\, \", \n
fn parse_labels<'a>(mut s: &'a str, labels: &mut BTreeMap<String, String>) -> Option<&'a str> {
    loop {
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix('}') {
            return Some(rest);
        }
        if s.is_empty() {
            return None;
        }

        let eq = s.find('=')?;
        let name = s[..eq].trim().to_string();
        s = s[eq + 1..].trim_start().strip_prefix('"')?;

        let mut value = String::new();
        let mut end = None;
        let mut chars = s.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    },
                    None => return None,
                },
                '"' => {
                    end = Some(i);
                    break;
                },
                c => value.push(c),
            }
        }

        labels.insert(name, value);
        s = s[end? + 1..].trim_start();
        if let Some(rest) = s.strip_prefix(',') {
            s = rest;
        }
    }
}
