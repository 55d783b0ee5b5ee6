use std::collections::HashSet;

use anyhow::{Context, Result};
use log::debug;

use self::{matcher::RulesMatcher, rule::Rule};
use super::{CacheKey, FilterCache, FilterId, FilterResult, RequestContext};
use crate::dns::{Rcode, RecordData, RecordType, Response};

mod matcher;
mod rule;

pub const REWRITE_TTL: u32 = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    pub rewrites: bool,
    pub client_rules: bool,
}

pub struct RuleList {
    id: FilterId,
    scope: Option<String>,
    matcher: RulesMatcher,
    cache: Option<FilterCache>,
}

impl RuleList {
    pub fn from_bytes(
        data: &[u8],
        id: FilterId,
        scope: Option<String>,
        options: CompileOptions,
        cache: Option<FilterCache>,
    ) -> Result<Self> {
        let text = std::str::from_utf8(data).with_context(|| format!("{}: bad rule list", id))?;
        Ok(Self::new(text, id, scope, options, cache))
    }

    pub fn new(
        text: &str,
        id: FilterId,
        scope: Option<String>,
        options: CompileOptions,
        cache: Option<FilterCache>,
    ) -> Self {
        let mut rules = Vec::new();
        let mut badfiltered = HashSet::new();
        let mut skipped = 0;
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|x| !x.is_empty() && !x.starts_with('!') && !x.starts_with('#'));
        for line in lines {
            let parsed = match Rule::parse(line) {
                Ok(parsed) => parsed,
                Err(err) => {
                    debug!("{}: skipping rule {:?}: {:#}", id, line, err);
                    skipped += 1;
                    continue;
                }
            };
            for rule in parsed {
                if rule.badfilter {
                    badfiltered.insert(rule.badfiltered_text());
                } else if (rule.rewrite.is_some() && !options.rewrites)
                    || (rule.clients.is_some() && !options.client_rules)
                {
                    skipped += 1;
                } else {
                    rules.push(rule);
                }
            }
        }
        rules.retain(|rule| !badfiltered.contains(rule.text.as_str()));
        debug!("{}: compiled {} rules, skipped {}", id, rules.len(), skipped);

        Self {
            id,
            scope,
            matcher: RulesMatcher::new(rules),
            cache,
        }
    }

    pub fn id(&self) -> &FilterId {
        &self.id
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn rules_count(&self) -> usize {
        self.matcher.len()
    }

    pub fn filter_request(&self, ctx: &RequestContext) -> Option<FilterResult> {
        let key = CacheKey::new(ctx.host(), ctx.qtype(), ctx.qclass(), false);
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return cached.map(|r| r.for_request(&ctx.request));
        }
        let result = self.decide(ctx, ctx.host(), ctx.qtype(), true);
        if let Some(cache) = &self.cache {
            cache.insert(key, result.clone());
        }
        result
    }

    pub fn filter_response(&self, ctx: &RequestContext, response: &Response) -> Option<FilterResult> {
        response.answers.iter().find_map(|record| {
            let (host, rtype) = match &record.data {
                RecordData::Cname(host) => (host.clone(), RecordType::CNAME),
                RecordData::A(ip) => (ip.to_string(), RecordType::A),
                RecordData::Aaaa(ip) => (ip.to_string(), RecordType::AAAA),
                RecordData::Txt(_) => return None,
            };
            let key = CacheKey::new(&host, rtype, ctx.qclass(), true);
            if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&key)) {
                return cached;
            }
            let result = self.decide(ctx, &host, rtype, false);
            if let Some(cache) = &self.cache {
                cache.insert(key, result.clone());
            }
            result
        })
    }

    fn decide(
        &self,
        ctx: &RequestContext,
        host: &str,
        qtype: RecordType,
        rewrites: bool,
    ) -> Option<FilterResult> {
        let matched = self
            .matcher
            .matches(host)
            .into_iter()
            .filter(|r| r.applies_to(qtype, ctx.client_ip, ctx.client_name.as_deref()))
            .collect::<Vec<_>>();
        let find = |allow: bool, important: bool| {
            matched
                .iter()
                .find(|r| r.rewrite.is_none() && r.allow == allow && (r.important || !important))
        };

        if let Some(rule) = find(true, true) {
            return Some(self.allowed(rule));
        }
        if let Some(rule) = find(false, true) {
            return Some(self.blocked(rule));
        }
        if let Some(rule) = find(true, false) {
            return Some(self.allowed(rule));
        }
        if rewrites && !matched.iter().any(|r| r.allow && r.rewrite.is_some()) {
            let rewrite_rules = matched
                .iter()
                .filter(|r| !r.allow && r.rewrite.is_some())
                .copied()
                .collect::<Vec<_>>();
            if !rewrite_rules.is_empty() {
                return Some(self.rewritten(ctx, qtype, &rewrite_rules));
            }
        }
        find(false, false).map(|rule| self.blocked(rule))
    }

    fn allowed(&self, rule: &Rule) -> FilterResult {
        FilterResult::Allowed {
            list: self.id.clone(),
            rule: rule.text.clone(),
        }
    }

    fn blocked(&self, rule: &Rule) -> FilterResult {
        FilterResult::Blocked {
            list: self.id.clone(),
            rule: rule.text.clone(),
        }
    }

    fn rewritten(&self, ctx: &RequestContext, qtype: RecordType, rules: &[&Rule]) -> FilterResult {
        let cname = rules
            .iter()
            .find_map(|r| match r.rewrite.as_ref()?.data.as_ref() {
                Some(RecordData::Cname(host)) => Some((*r, host)),
                _ => None,
            });
        if let Some((rule, host)) = cname {
            return FilterResult::ModifiedRequest {
                request: ctx.request.with_host(host),
                list: self.id.clone(),
                rule: rule.text.clone(),
            };
        }

        let rcode = rules.iter().find_map(|r| {
            let rcode = r.rewrite.as_ref()?.rcode;
            (rcode != Rcode::NoError).then_some((*r, rcode))
        });
        if let Some((rule, rcode)) = rcode {
            return FilterResult::ModifiedResponse {
                response: Response::new(&ctx.request, rcode),
                list: self.id.clone(),
                rule: rule.text.clone(),
            };
        }

        let answers = rules
            .iter()
            .filter_map(|r| r.rewrite.as_ref()?.data.clone())
            .filter(|data| data.record_type() == qtype)
            .collect::<Vec<_>>();
        FilterResult::ModifiedResponse {
            response: Response::with_answers(&ctx.request, REWRITE_TTL, answers),
            list: self.id.clone(),
            rule: rules[0].text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::{CompileOptions, RuleList, REWRITE_TTL};
    use crate::{
        cache_manager::CacheManager,
        dns::{Rcode, Record, RecordData, RecordType, Request, Response},
        filter::{FilterCache, FilterId, FilterResult, RequestContext, RuleText},
        metrics::Metrics,
    };

    fn list(text: &str, options: CompileOptions) -> RuleList {
        RuleList::new(text, FilterId::new("test").unwrap(), None, options, None)
    }

    fn ctx(host: &str, qtype: RecordType) -> RequestContext {
        RequestContext::new(Request::new(1, host, qtype))
    }

    fn blocked(rule: &str) -> Option<FilterResult> {
        Some(FilterResult::Blocked {
            list: FilterId::new("test").unwrap(),
            rule: RuleText::new(rule).unwrap(),
        })
    }

    fn allowed(rule: &str) -> Option<FilterResult> {
        Some(FilterResult::Allowed {
            list: FilterId::new("test").unwrap(),
            rule: RuleText::new(rule).unwrap(),
        })
    }

    #[test]
    fn should_block_anchored_host() {
        let list = list("|blocked.example^", CompileOptions::default());

        assert_eq!(
            list.filter_request(&ctx("blocked.example.", RecordType::A)),
            blocked("|blocked.example^")
        );
        assert_eq!(list.filter_request(&ctx("other.example", RecordType::A)), None);
    }

    #[test]
    fn should_never_match_when_empty() {
        let list = list("", CompileOptions::default());

        assert_eq!(list.rules_count(), 0);
        assert_eq!(list.filter_request(&ctx("example.org", RecordType::A)), None);
    }

    #[test]
    fn should_apply_precedence() {
        let text = "
! comment
# comment
||ads.example^
@@||good.ads.example^
||good.ads.example^$important
@@||vip.ads.example^$important
||vip.ads.example^$important
";
        let list = list(text, CompileOptions::default());

        assert_eq!(list.rules_count(), 5);
        assert_eq!(
            list.filter_request(&ctx("x.ads.example", RecordType::A)),
            blocked("||ads.example^")
        );
        assert_eq!(
            list.filter_request(&ctx("good.ads.example", RecordType::A)),
            blocked("||good.ads.example^$important")
        );
        assert_eq!(
            list.filter_request(&ctx("vip.ads.example", RecordType::A)),
            allowed("@@||vip.ads.example^$important")
        );
    }

    #[test]
    fn should_skip_invalid_and_badfiltered_rules() {
        let text = "
||one.example^$unknown_modifier
||two.example^
||two.example^$badfilter
||three.example^$dnstype=AAAA
0.0.0.0 four.example
";
        let list = list(text, CompileOptions::default());

        assert_eq!(list.rules_count(), 2);
        assert_eq!(list.filter_request(&ctx("one.example", RecordType::A)), None);
        assert_eq!(list.filter_request(&ctx("two.example", RecordType::A)), None);
        assert_eq!(list.filter_request(&ctx("three.example", RecordType::A)), None);
        assert_eq!(
            list.filter_request(&ctx("three.example", RecordType::AAAA)),
            blocked("||three.example^$dnstype=AAAA")
        );
        assert_eq!(
            list.filter_request(&ctx("four.example", RecordType::A)),
            blocked("0.0.0.0 four.example")
        );
    }

    #[test]
    fn should_drop_rules_with_broken_regex() {
        let list = list("/[/\n||ok.example^", CompileOptions::default());

        assert_eq!(list.rules_count(), 1);
        assert_eq!(
            list.filter_request(&ctx("ok.example", RecordType::A)),
            blocked("||ok.example^")
        );
    }

    #[test]
    fn should_rewrite_only_when_enabled() {
        let text = "||rewrite.example^$dnsrewrite=1.2.3.4\n||cname.example^$dnsrewrite=target.example";

        let disabled = list(text, CompileOptions::default());
        assert_eq!(disabled.rules_count(), 0);

        let enabled = list(
            text,
            CompileOptions {
                rewrites: true,
                ..Default::default()
            },
        );
        let request = ctx("rewrite.example", RecordType::A);
        assert_eq!(
            enabled.filter_request(&request),
            Some(FilterResult::ModifiedResponse {
                response: Response::with_answers(
                    &request.request,
                    REWRITE_TTL,
                    [RecordData::A([1, 2, 3, 4].into())]
                ),
                list: FilterId::new("test").unwrap(),
                rule: RuleText::new("||rewrite.example^$dnsrewrite=1.2.3.4").unwrap(),
            })
        );

        let request = ctx("cname.example", RecordType::A);
        match enabled.filter_request(&request) {
            Some(FilterResult::ModifiedRequest { request, .. }) => {
                assert_eq!(request.host(), "target.example")
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn should_cancel_rewrites_with_allow_rule() {
        let options = CompileOptions {
            rewrites: true,
            ..Default::default()
        };

        let text = "||a.example^$dnsrewrite=REFUSED\n||a.example^";
        match list(text, options).filter_request(&ctx("a.example", RecordType::A)) {
            Some(FilterResult::ModifiedResponse { response, .. }) => {
                assert_eq!(response.rcode, Rcode::Refused)
            }
            other => panic!("unexpected result {:?}", other),
        }

        let text = "||a.example^$dnsrewrite=REFUSED\n@@||a.example^$dnsrewrite\n||a.example^";
        assert_eq!(
            list(text, options).filter_request(&ctx("a.example", RecordType::A)),
            blocked("||a.example^")
        );
    }

    #[test]
    fn should_honour_client_rules_only_when_enabled() {
        let text = "||kids.example^$client=10.0.0.5";
        let request = ctx("kids.example", RecordType::A).with_client(Some([10, 0, 0, 5].into()), None);

        assert_eq!(list(text, CompileOptions::default()).rules_count(), 0);

        let custom = list(
            text,
            CompileOptions {
                client_rules: true,
                ..Default::default()
            },
        );
        assert_eq!(custom.filter_request(&request), blocked("||kids.example^$client=10.0.0.5"));
        assert_eq!(custom.filter_request(&ctx("kids.example", RecordType::A)), None);
    }

    #[test]
    fn should_filter_response_by_cname_and_address() {
        let list = list("||tracker.example^\n||10.0.0.1^", CompileOptions::default());
        let request = ctx("innocent.example", RecordType::A);
        let response = |data: RecordData| Response {
            answers: vec![Record {
                name: "innocent.example".to_owned(),
                ttl: 60,
                data,
            }],
            ..Response::new(&request.request, Rcode::NoError)
        };

        assert_eq!(
            list.filter_response(&request, &response(RecordData::Cname("cdn.tracker.example".to_owned()))),
            blocked("||tracker.example^")
        );
        assert_eq!(
            list.filter_response(&request, &response(RecordData::A([10, 0, 0, 1].into()))),
            blocked("||10.0.0.1^")
        );
        assert_eq!(
            list.filter_response(&request, &response(RecordData::A([10, 0, 0, 2].into()))),
            None
        );
    }

    #[test]
    fn should_serve_cached_results() {
        let metrics = Arc::new(Metrics::unregistered());
        let manager = CacheManager::new();
        let cache = FilterCache::new("filters/test", 10, None, metrics.clone());
        cache.register(&manager);
        let list = RuleList::new(
            "||cached.example^$dnsrewrite=NXDOMAIN",
            FilterId::new("test").unwrap(),
            None,
            CompileOptions {
                rewrites: true,
                ..Default::default()
            },
            Some(cache),
        );

        let first = list.filter_request(&ctx("cached.example", RecordType::A));
        let mut second_ctx = ctx("cached.example", RecordType::A);
        second_ctx.request.id = 7;
        let second = list.filter_request(&second_ctx);

        assert_eq!(metrics.cache_lookups("filters/test", true), 1);
        assert_eq!(metrics.cache_lookups("filters/test", false), 1);
        assert_eq!(first.map(|r| r.for_request(&second_ctx.request)), second);
        assert_eq!(manager.ids(), vec!["filters/test".to_owned()]);
    }
}
