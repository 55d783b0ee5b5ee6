use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
};

pub const CLASS_IN: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordType(pub u16);

impl RecordType {
    pub const A: Self = Self(1);
    pub const NS: Self = Self(2);
    pub const CNAME: Self = Self(5);
    pub const SOA: Self = Self(6);
    pub const PTR: Self = Self(12);
    pub const MX: Self = Self(15);
    pub const TXT: Self = Self(16);
    pub const AAAA: Self = Self(28);
    pub const SRV: Self = Self(33);
    pub const SVCB: Self = Self(64);
    pub const HTTPS: Self = Self(65);
    pub const ANY: Self = Self(255);

    const NAMES: [(&'static str, RecordType); 12] = [
        ("A", Self::A),
        ("NS", Self::NS),
        ("CNAME", Self::CNAME),
        ("SOA", Self::SOA),
        ("PTR", Self::PTR),
        ("MX", Self::MX),
        ("TXT", Self::TXT),
        ("AAAA", Self::AAAA),
        ("SRV", Self::SRV),
        ("SVCB", Self::SVCB),
        ("HTTPS", Self::HTTPS),
        ("ANY", Self::ANY),
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, t)| *t)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::NAMES.iter().find(|(_, t)| t == self) {
            Some((name, _)) => f.write_str(name),
            None => write!(f, "TYPE{}", self.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rcode {
    NoError,
    ServFail,
    NxDomain,
    Refused,
}

impl Rcode {
    pub fn code(self) -> u8 {
        match self {
            Rcode::NoError => 0,
            Rcode::ServFail => 2,
            Rcode::NxDomain => 3,
            Rcode::Refused => 5,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "NOERROR" => Some(Rcode::NoError),
            "SERVFAIL" => Some(Rcode::ServFail),
            "NXDOMAIN" => Some(Rcode::NxDomain),
            "REFUSED" => Some(Rcode::Refused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    pub id: u16,
    pub question: Question,
}

impl Request {
    pub fn new(id: u16, host: &str, qtype: RecordType) -> Self {
        Self {
            id,
            question: Question {
                name: normalize_host(host),
                qtype,
                qclass: CLASS_IN,
            },
        }
    }

    pub fn host(&self) -> &str {
        &self.question.name
    }

    pub fn qtype(&self) -> RecordType {
        self.question.qtype
    }

    pub fn qclass(&self) -> u16 {
        self.question.qclass
    }

    pub fn with_host(&self, host: &str) -> Self {
        let mut request = self.clone();
        request.question.name = normalize_host(host);
        request
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Txt(Vec<String>),
}

impl RecordData {
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordData::A(_) => RecordType::A,
            RecordData::Aaaa(_) => RecordType::AAAA,
            RecordData::Cname(_) => RecordType::CNAME,
            RecordData::Txt(_) => RecordType::TXT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub name: String,
    pub ttl: u32,
    pub data: RecordData,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Response {
    pub id: u16,
    pub rcode: Rcode,
    pub question: Question,
    pub answers: Vec<Record>,
}

impl Response {
    pub fn new(request: &Request, rcode: Rcode) -> Self {
        Self {
            id: request.id,
            rcode,
            question: request.question.clone(),
            answers: Vec::new(),
        }
    }

    pub fn with_answers(
        request: &Request,
        ttl: u32,
        data: impl IntoIterator<Item = RecordData>,
    ) -> Self {
        let mut response = Self::new(request, Rcode::NoError);
        response.answers = data
            .into_iter()
            .map(|data| Record {
                name: request.host().to_owned(),
                ttl,
                data,
            })
            .collect();
        response
    }
}

pub fn normalize_host(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{normalize_host, RecordData, RecordType, Request, Response};
    use pretty_assertions::assert_eq;

    #[test]
    fn should_parse_record_type_names() {
        assert_eq!(RecordType::from_name("aaaa"), Some(RecordType::AAAA));
        assert_eq!(RecordType::from_name("HTTPS"), Some(RecordType::HTTPS));
        assert_eq!(RecordType::from_name("BOGUS"), None);
        assert_eq!(RecordType(99).to_string(), "TYPE99");
        assert_eq!(RecordType::CNAME.to_string(), "CNAME");
    }

    #[test]
    fn should_normalize_request_host() {
        let request = Request::new(1, "WWW.Example.ORG.", RecordType::A);

        assert_eq!(request.host(), "www.example.org");
        assert_eq!(normalize_host("a.b."), "a.b");
    }

    #[test]
    fn should_answer_with_request_host() {
        let request = Request::new(7, "blocked.example", RecordType::A);

        let response = Response::with_answers(&request, 10, [RecordData::A([1, 2, 3, 4].into())]);

        assert_eq!(response.id, 7);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].name, "blocked.example");
        assert_eq!(response.answers[0].ttl, 10);
    }
}
