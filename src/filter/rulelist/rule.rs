use std::net::IpAddr;

use anyhow::{anyhow, bail, Result};
use log::warn;
use nom::{
    bytes::complete::{take_till, take_till1, take_while1},
    character::complete::{char, space1},
    combinator::{all_consuming, map_res, opt, rest},
    multi::{many1, separated_list1},
    sequence::{pair, preceded, tuple},
    IResult,
};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::{
    dns::{normalize_host, Rcode, RecordData, RecordType},
    filter::RuleText,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRewrite {
    pub rcode: Rcode,
    pub data: Option<RecordData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMatch {
    Ip(IpAddr),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Restriction<T> {
    pub include: Vec<T>,
    pub exclude: Vec<T>,
}

impl<T> Restriction<T> {
    fn allows(&self, matches: impl Fn(&T) -> bool) -> bool {
        (self.include.is_empty() || self.include.iter().any(&matches))
            && !self.exclude.iter().any(matches)
    }
}

#[derive(Debug)]
pub struct Rule {
    pub text: RuleText,
    pub pattern: String,
    pub allow: bool,
    pub important: bool,
    pub badfilter: bool,
    pub dnstype: Option<Restriction<RecordType>>,
    pub clients: Option<Restriction<ClientMatch>>,
    pub rewrite: Option<DnsRewrite>,
    regex: OnceCell<Regex>,
}

impl Rule {
    pub fn parse(line: &str) -> Result<Vec<Rule>> {
        let text = RuleText::new(line)?;
        let without_comment = line.split('#').next().unwrap_or_default().trim();
        if let Ok((_, (_, hosts))) = hosts_line(without_comment) {
            return Ok(hosts
                .into_iter()
                .filter(|host| host.parse::<IpAddr>().is_err())
                .map(|host| Rule::new(text.clone(), format!("|{}^", normalize_host(host))))
                .collect());
        }

        let (allow, body) = match line.strip_prefix("@@") {
            Some(body) => (true, body),
            None => (false, line),
        };
        let (pattern, modifiers) = split_modifiers(body);
        if pattern.is_empty() {
            bail!("empty pattern");
        }
        let pattern = if is_regex(pattern) {
            pattern.to_owned()
        } else {
            pattern.to_ascii_lowercase()
        };
        let regex = if is_regex(&pattern) {
            Some(Regex::new(&create_regex_string(&pattern))?)
        } else {
            None
        };
        let mut rule = Rule::new(text, pattern);
        if let Some(regex) = regex {
            let _ = rule.regex.set(regex);
        }
        rule.allow = allow;
        if let Some(modifiers) = modifiers {
            let (_, modifiers) = parse_modifiers(modifiers)
                .map_err(|err| anyhow!("bad modifiers {:?}: {:?}", modifiers, err))?;
            for (name, value) in modifiers {
                rule.apply_modifier(name, value)?;
            }
        }
        Ok(vec![rule])
    }

    fn new(text: RuleText, pattern: String) -> Self {
        Self {
            text,
            pattern,
            allow: false,
            important: false,
            badfilter: false,
            dnstype: None,
            clients: None,
            rewrite: None,
            regex: OnceCell::new(),
        }
    }

    fn apply_modifier(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        match (name, value) {
            ("important", None) => self.important = true,
            ("badfilter", None) => self.badfilter = true,
            ("dnstype", Some(value)) => {
                self.dnstype = Some(parse_restriction(value, |t| {
                    RecordType::from_name(t).ok_or_else(|| anyhow!("unknown dns type {}", t))
                })?)
            }
            ("client", Some(value)) => {
                self.clients = Some(parse_restriction(value, |c| {
                    let c = c.trim_matches(|c| c == '\'' || c == '"');
                    Ok(match c.parse::<IpAddr>() {
                        Ok(ip) => ClientMatch::Ip(ip),
                        Err(_) => ClientMatch::Name(c.to_owned()),
                    })
                })?)
            }
            ("dnsrewrite", Some(value)) => self.rewrite = Some(parse_rewrite(value)?),
            ("dnsrewrite", None) if self.allow => {
                self.rewrite = Some(DnsRewrite {
                    rcode: Rcode::NoError,
                    data: None,
                })
            }
            (name, _) => bail!("unsupported modifier {}", name),
        }
        Ok(())
    }

    pub fn badfiltered_text(&self) -> String {
        let text = self.text.as_str();
        match text.rfind('$') {
            Some(idx) => {
                let modifiers = text[idx + 1..]
                    .split(',')
                    .filter(|m| *m != "badfilter")
                    .collect::<Vec<_>>();
                if modifiers.is_empty() {
                    text[..idx].to_owned()
                } else {
                    format!("{}${}", &text[..idx], modifiers.join(","))
                }
            }
            None => text.to_owned(),
        }
    }

    pub fn applies_to(
        &self,
        qtype: RecordType,
        client_ip: Option<IpAddr>,
        client_name: Option<&str>,
    ) -> bool {
        let type_ok = self
            .dnstype
            .as_ref()
            .map_or(true, |types| types.allows(|t| *t == qtype));
        let client_ok = self.clients.as_ref().map_or(true, |clients| {
            clients.allows(|c| match c {
                ClientMatch::Ip(ip) => Some(*ip) == client_ip,
                ClientMatch::Name(name) => Some(name.as_str()) == client_name,
            })
        });
        type_ok && client_ok
    }

    pub fn is_match(&self, s: &str) -> bool {
        let regex = self
            .regex
            .get_or_try_init(|| Regex::new(&create_regex_string(&self.pattern)));
        match regex {
            Ok(regex) => regex.is_match(s),
            Err(err) => {
                warn!("Got bad regex {:?} from rule {}", err, self.text);
                false
            }
        }
    }
}

pub fn is_regex(pattern: &str) -> bool {
    pattern.len() > 1 && pattern.starts_with('/') && pattern.ends_with('/')
}

fn split_modifiers(body: &str) -> (&str, Option<&str>) {
    if body.starts_with('/') {
        if let Some(end) = body.rfind('/').filter(|end| *end > 0) {
            match &body[end + 1..] {
                "" => return (body, None),
                rest if rest.starts_with('$') => return (&body[..=end], Some(&rest[1..])),
                _ => (),
            }
        }
    }
    match body.find('$') {
        Some(idx) => (&body[..idx], Some(&body[idx + 1..])),
        None => (body, None),
    }
}

fn create_regex_string(pattern: &str) -> String {
    if is_regex(pattern) {
        pattern[1..pattern.len() - 1].replace(r"\/", r"/")
    } else {
        let mut regex = regex::escape(pattern)
            .replace(r"\*", ".*")
            .replace(r"\^", "([^ a-zA-Z0-9.%_-]|$)");

        if let Some(stripped) = regex.strip_prefix(r"\|\|") {
            regex = String::from(r"([a-z0-9_.-]+\.|^)") + stripped;
        } else if let Some(stripped) = regex.strip_prefix(r"\|") {
            regex = String::from("^") + stripped;
        }
        if let Some(stripped) = regex.strip_suffix(r"\|") {
            regex = String::from(stripped) + "$";
        }
        regex
    }
}

fn parse_restriction<T>(value: &str, parse: impl Fn(&str) -> Result<T>) -> Result<Restriction<T>> {
    let mut restriction = Restriction {
        include: Vec::new(),
        exclude: Vec::new(),
    };
    for item in value.split('|').filter(|i| !i.is_empty()) {
        match item.strip_prefix('~') {
            Some(item) => restriction.exclude.push(parse(item)?),
            None => restriction.include.push(parse(item)?),
        }
    }
    if restriction.include.is_empty() && restriction.exclude.is_empty() {
        bail!("empty modifier value");
    }
    Ok(restriction)
}

fn parse_rewrite(value: &str) -> Result<DnsRewrite> {
    if let Ok((_, (rcode, _, rrtype, _, value))) = rewrite_full(value) {
        let rcode = Rcode::from_name(rcode).ok_or_else(|| anyhow!("unknown rcode {}", rcode))?;
        if rcode != Rcode::NoError || rrtype.is_empty() {
            return Ok(DnsRewrite { rcode, data: None });
        }
        let data = match RecordType::from_name(rrtype) {
            Some(RecordType::A) => RecordData::A(value.parse()?),
            Some(RecordType::AAAA) => RecordData::Aaaa(value.parse()?),
            Some(RecordType::CNAME) => RecordData::Cname(normalize_host(value)),
            Some(RecordType::TXT) => RecordData::Txt(vec![value.to_owned()]),
            _ => bail!("unsupported rewrite type {}", rrtype),
        };
        return Ok(DnsRewrite {
            rcode,
            data: Some(data),
        });
    }

    if let Some(rcode) = Rcode::from_name(value) {
        return Ok(DnsRewrite { rcode, data: None });
    }
    let data = match value.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => RecordData::A(ip),
        Ok(IpAddr::V6(ip)) => RecordData::Aaaa(ip),
        Err(_) if is_host(value) => RecordData::Cname(normalize_host(value)),
        Err(_) => bail!("bad rewrite value {:?}", value),
    };
    Ok(DnsRewrite {
        rcode: Rcode::NoError,
        data: Some(data),
    })
}

fn is_host(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

fn hosts_line(input: &str) -> IResult<&str, (IpAddr, Vec<&str>)> {
    all_consuming(pair(
        map_res(take_till1(char::is_whitespace), str::parse::<IpAddr>),
        many1(preceded(space1, take_till1(char::is_whitespace))),
    ))(input)
}

fn parse_modifiers(input: &str) -> IResult<&str, Vec<(&str, Option<&str>)>> {
    let name = take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_');
    let value = opt(preceded(char('='), take_till(|c| c == ',')));
    all_consuming(separated_list1(char(','), pair(name, value)))(input)
}

fn rewrite_full(input: &str) -> IResult<&str, (&str, char, &str, char, &str)> {
    let field = || take_till(|c| c == ';');
    tuple((field(), char(';'), field(), char(';'), rest))(input)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{ClientMatch, DnsRewrite, Rule};
    use crate::dns::{Rcode, RecordData, RecordType};

    fn parse_one(line: &str) -> Rule {
        let mut rules = Rule::parse(line).unwrap();
        assert_eq!(rules.len(), 1);
        rules.remove(0)
    }

    #[test]
    fn should_match_adblock_patterns() {
        let rule = parse_one("||ads.example^");
        assert!(rule.is_match("ads.example"));
        assert!(rule.is_match("sub.ads.example"));
        assert!(!rule.is_match("notads.example"));
        assert!(!rule.is_match("ads.example.org"));

        let rule = parse_one("|blocked.example^");
        assert!(rule.is_match("blocked.example"));
        assert!(!rule.is_match("sub.blocked.example"));

        let rule = parse_one("||play*.videos.example^");
        assert!(rule.is_match("playvideododo.ddd.videos.example"));
        assert!(!rule.is_match("videos.example"));

        let rule = parse_one(r"/^ads?\d+\.example\.com$/");
        assert!(rule.is_match("ads1.example.com"));
        assert!(!rule.is_match("adsx.example.com"));
    }

    #[test]
    fn should_reject_broken_regex() {
        assert!(Rule::parse("/[/").is_err());
        assert!(Rule::parse("@@/ads(/$important").is_err());
    }

    #[test]
    fn should_parse_hosts_lines() {
        let rules = Rule::parse("0.0.0.0 one.example two.example # trailing").unwrap();

        assert_eq!(rules.len(), 2);
        assert!(rules[0].is_match("one.example"));
        assert!(!rules[0].is_match("sub.one.example"));
        assert!(rules[1].is_match("two.example"));
        assert_eq!(
            rules[0].text.as_str(),
            "0.0.0.0 one.example two.example # trailing"
        );
    }

    #[test]
    fn should_parse_modifiers() {
        let rule = parse_one("@@||example.org^$important,dnstype=A|~AAAA,client=10.0.0.1|~'my phone'");

        assert!(rule.allow);
        assert!(rule.important);
        assert!(rule.applies_to(RecordType::A, Some("10.0.0.1".parse().unwrap()), None));
        assert!(!rule.applies_to(RecordType::AAAA, Some("10.0.0.1".parse().unwrap()), None));
        assert!(!rule.applies_to(RecordType::A, None, None));
        assert_eq!(
            rule.clients.as_ref().unwrap().exclude,
            vec![ClientMatch::Name("my phone".to_owned())]
        );
    }

    #[test]
    fn should_parse_rewrites() {
        let cases = [
            (
                "1.2.3.4",
                DnsRewrite {
                    rcode: Rcode::NoError,
                    data: Some(RecordData::A([1, 2, 3, 4].into())),
                },
            ),
            (
                "safe.example",
                DnsRewrite {
                    rcode: Rcode::NoError,
                    data: Some(RecordData::Cname("safe.example".to_owned())),
                },
            ),
            (
                "REFUSED",
                DnsRewrite {
                    rcode: Rcode::Refused,
                    data: None,
                },
            ),
            (
                "NOERROR;TXT;hello",
                DnsRewrite {
                    rcode: Rcode::NoError,
                    data: Some(RecordData::Txt(vec!["hello".to_owned()])),
                },
            ),
            (
                "NXDOMAIN;;",
                DnsRewrite {
                    rcode: Rcode::NxDomain,
                    data: None,
                },
            ),
        ];
        for (value, expected) in cases {
            let rule = parse_one(&format!("||example.org^$dnsrewrite={}", value));
            assert_eq!(rule.rewrite, Some(expected), "{}", value);
        }
    }

    #[test]
    fn should_keep_dollar_inside_regex() {
        let rule = parse_one(r"/^example\.org$/$important");

        assert!(rule.important);
        assert!(rule.is_match("example.org"));
        assert!(!rule.is_match("sub.example.org"));
    }

    #[test]
    fn should_reject_bad_rules() {
        assert!(Rule::parse("||example.org^$unknown").is_err());
        assert!(Rule::parse("||example.org^$dnstype=BOGUS").is_err());
        assert!(Rule::parse("||example.org^$dnsrewrite=NOERROR;MX;x").is_err());
        assert!(Rule::parse("$important").is_err());
        assert!(Rule::parse(&format!("||{}^", "a".repeat(1100))).is_err());
    }

    #[test]
    fn should_compute_badfiltered_text() {
        let rule = parse_one("||example.org^$important,badfilter");
        assert!(rule.badfilter);
        assert_eq!(rule.badfiltered_text(), "||example.org^$important");

        let rule = parse_one("||example.org^$badfilter");
        assert_eq!(rule.badfiltered_text(), "||example.org^");
    }
}
