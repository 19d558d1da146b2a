//! Path normalization and the route pattern compiler.
//!
//! Patterns are compiled into a flat list of [`Segment`]s. Supported syntax:
//!
//! - `:name` captures up to the next `/`, `-`, `.` or parameter start
//! - `:name?` makes the capture optional
//! - `+` captures greedily and requires at least one byte (named `+1`, `+2`, ...)
//! - `*` captures greedily and may be empty (named `*1`, `*2`, ...)
//! - `\` escapes any of the special characters above

/// Capacity of the per-request capture slots.
pub const MAX_PARAMS: usize = 30;

/// Captured parameter values, stored as byte ranges into the request path.
pub type ParamSlots = [(usize, usize); MAX_PARAMS];

pub(crate) const EMPTY_SLOTS: ParamSlots = [(0, 0); MAX_PARAMS];

const ESCAPE_CHAR: u8 = b'\\';
const OPTIONAL_PARAM: u8 = b'?';
const WILDCARD_PARAM: u8 = b'*';
const PLUS_PARAM: u8 = b'+';
const PARAM_STARTER: u8 = b':';
const SLASH: u8 = b'/';

const PARAM_START_CHARS: &[u8] = &[WILDCARD_PARAM, PLUS_PARAM, PARAM_STARTER];
const PARAM_DELIMITER_CHARS: &[u8] = &[PARAM_STARTER, SLASH, b'-', b'.'];
const PARAM_END_CHARS: &[u8] = &[OPTIONAL_PARAM, PARAM_STARTER, SLASH, b'-', b'.'];

/// Length of the literal prefix used to pick a tree bucket.
pub(crate) const TREE_KEY_LEN: usize = 3;

/// Routing flags that affect how paths are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOptions {
    pub case_sensitive: bool,
    pub strict_routing: bool,
}

/// Ensures the path is non-empty and starts with `/`.
pub(crate) fn canonical_path(raw: &str) -> String {
    if raw.is_empty() {
        "/".to_owned()
    } else if raw.starts_with('/') {
        raw.to_owned()
    } else {
        format!("/{}", raw)
    }
}

/// Applies case folding and the trailing-slash policy.
///
/// Folding is ASCII-only so byte offsets stay identical between the
/// normalized and the original path.
pub fn normalize_path(path: &str, options: RouteOptions) -> String {
    let mut normalized = if options.case_sensitive {
        path.to_owned()
    } else {
        path.to_ascii_lowercase()
    };
    if !options.strict_routing && normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

pub fn remove_escape_chars(path: &str) -> String {
    if path.as_bytes().contains(&ESCAPE_CHAR) {
        path.replace('\\', "")
    } else {
        path.to_owned()
    }
}

/// Joins a group or mount prefix with a route path.
pub fn group_path(prefix: &str, path: &str) -> String {
    if path.is_empty() {
        return prefix.to_owned();
    }
    let prefix = prefix.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", prefix, path)
    } else {
        format!("{}/{}", prefix, path)
    }
}

/// Bucket key for a request path: its first three bytes, or the empty key.
pub(crate) fn tree_key(detection_path: &str) -> &str {
    if detection_path.len() >= TREE_KEY_LEN {
        detection_path.get(..TREE_KEY_LEN).unwrap_or("")
    } else {
        ""
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    literal: String,
    param: Option<String>,
    greedy: bool,
    optional: bool,
    last: bool,
    optional_slash: bool,
    // literal text that terminates this parameter
    compare_part: String,
    // occurrences of `compare_part` in the literals that follow
    part_count: usize,
    // fixed capture length, 0 when undetermined
    length: usize,
}

impl Segment {
    fn literal(text: String) -> Self {
        Segment {
            length: text.len(),
            literal: text,
            ..Default::default()
        }
    }

    pub fn is_param(&self) -> bool {
        self.param.is_some()
    }

    pub fn param_name(&self) -> Option<&str> {
        self.param.as_deref()
    }

    pub fn literal_text(&self) -> &str {
        &self.literal
    }

    pub fn is_greedy(&self) -> bool {
        self.greedy
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// How many bytes of `s` this parameter captures.
    fn capture_len(&self, s: &str) -> usize {
        if self.last {
            if !self.greedy {
                if let Some(i) = s.find('/') {
                    return i;
                }
            }
            return s.len();
        }
        if self.length != 0 && s.len() >= self.length {
            return s.chars().next().map_or(0, char::len_utf8);
        }
        if self.greedy {
            let search_count = s.matches(self.compare_part.as_str()).count();
            if search_count > 1 {
                return self.greedy_len(s, search_count);
            }
        }
        if let Some(position) = s.find(self.compare_part.as_str()) {
            // a plain parameter never spans a slash
            if !self.greedy && self.compare_part.len() > 1 && s[..position].contains('/') {
                return 0;
            }
            return position;
        }
        s.len()
    }

    fn greedy_len(&self, mut s: &str, mut search_count: usize) -> usize {
        let mut remaining = self.part_count;
        while remaining > 0 && search_count > 0 {
            search_count -= 1;
            match s.rfind(self.compare_part.as_str()) {
                Some(position) => s = &s[..position],
                None => break,
            }
            remaining -= 1;
        }
        s.len()
    }
}

/// A compiled route path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePattern {
    segments: Vec<Segment>,
    params: Vec<String>,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Self {
        let mut parsed = RoutePattern::default();
        let (mut wildcards, mut pluses) = (0usize, 0usize);
        let mut rest = pattern;

        while !rest.is_empty() {
            let consumed = match next_param_position(rest) {
                Some(0) => {
                    let (consumed, segment) = parse_param(rest, &mut wildcards, &mut pluses);
                    if let Some(name) = &segment.param {
                        parsed.params.push(name.clone());
                    }
                    parsed.segments.push(segment);
                    consumed
                }
                next => {
                    let end = next.unwrap_or(rest.len());
                    parsed.segments.push(Segment::literal(remove_escape_chars(&rest[..end])));
                    end
                }
            };
            if consumed >= rest.len() {
                break;
            }
            rest = &rest[consumed..];
        }

        if let Some(last) = parsed.segments.last_mut() {
            last.last = true;
        }
        add_parameter_meta(&mut parsed.segments);
        parsed
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// First three bytes of the leading literal, or empty when the pattern
    /// has no deterministic literal prefix.
    pub fn tree_key(&self) -> &str {
        match self.segments.first() {
            Some(first) if !first.is_param() && first.literal.len() >= TREE_KEY_LEN => {
                first.literal.get(..TREE_KEY_LEN).unwrap_or("")
            }
            _ => "",
        }
    }

    /// Walks the segments against `detection_path`, writing capture ranges
    /// (relative to `path`) into `slots` only when the whole pattern matches.
    /// `partial` accepts trailing unmatched input, used for middleware.
    pub fn captures(&self, detection_path: &str, slots: &mut ParamSlots, partial: bool) -> bool {
        let mut found = EMPTY_SLOTS;
        let mut found_count = 0;
        let mut rest = detection_path;
        let mut offset = 0;

        for segment in &self.segments {
            let part_len = rest.len();
            let mut consumed;
            if !segment.is_param() {
                consumed = segment.length;
                let literal = segment.literal.as_bytes();
                if segment.optional_slash
                    && part_len == consumed - 1
                    && rest.as_bytes() == &literal[..consumed - 1]
                {
                    consumed -= 1;
                } else if !(consumed <= part_len && &rest.as_bytes()[..consumed] == literal) {
                    return false;
                }
            } else {
                consumed = segment.capture_len(rest);
                if !segment.optional && consumed == 0 {
                    return false;
                }
                if found_count == MAX_PARAMS {
                    return false;
                }
                found[found_count] = (offset, offset + consumed);
                found_count += 1;
            }
            if part_len > 0 {
                rest = &rest[consumed..];
                offset += consumed;
            }
        }

        if !rest.is_empty() && !partial {
            return false;
        }
        slots[..found_count].copy_from_slice(&found[..found_count]);
        true
    }
}

fn is_in_charset(c: u8, charset: &[u8]) -> bool {
    charset.contains(&c)
}

fn find_charset_position(search: &[u8], charset: &[u8]) -> Option<usize> {
    search.iter().position(|c| is_in_charset(*c, charset))
}

/// Like [`find_charset_position`] but skips characters preceded by `\`.
fn find_unescaped_charset_position(search: &[u8], charset: &[u8]) -> Option<usize> {
    let mut position = find_charset_position(search, charset)?;
    while position > 0 && search[position - 1] == ESCAPE_CHAR {
        if search.len() == position + 1 {
            return None;
        }
        let next = find_charset_position(&search[position + 1..], charset)?;
        position += next + 1;
    }
    Some(position)
}

fn next_param_position(pattern: &str) -> Option<usize> {
    let bytes = pattern.as_bytes();
    let position = find_unescaped_charset_position(bytes, PARAM_START_CHARS)?;
    // `::name` keeps the first colon as a literal
    if bytes[position] != WILDCARD_PARAM
        && find_unescaped_charset_position(&bytes[position + 1..], PARAM_START_CHARS) == Some(0)
    {
        return Some(position + 1);
    }
    Some(position)
}

fn parse_param(pattern: &str, wildcards: &mut usize, pluses: &mut usize) -> (usize, Segment) {
    let bytes = pattern.as_bytes();
    let is_wildcard = bytes[0] == WILDCARD_PARAM;
    let is_plus = bytes[0] == PLUS_PARAM;

    let end = if is_wildcard || is_plus {
        0
    } else {
        match find_unescaped_charset_position(&bytes[1..], PARAM_END_CHARS) {
            None => bytes.len() - 1,
            Some(p) if !is_in_charset(bytes[p + 1], PARAM_DELIMITER_CHARS) => p + 1,
            Some(p) => p,
        }
    };

    let processed = &pattern[..=end];
    let mut name = remove_escape_chars(trimmed_param(processed));
    if is_wildcard {
        *wildcards += 1;
        name.push_str(&wildcards.to_string());
    } else if is_plus {
        *pluses += 1;
        name.push_str(&pluses.to_string());
    }

    let segment = Segment {
        param: Some(name),
        optional: is_wildcard || bytes[end] == OPTIONAL_PARAM,
        greedy: is_wildcard || is_plus,
        ..Default::default()
    };
    (end + 1, segment)
}

/// Strips the leading `:` and trailing `?` from a parameter token.
fn trimmed_param(param: &str) -> &str {
    match param.strip_prefix(':') {
        Some(name) => name.strip_suffix('?').unwrap_or(name),
        None => param,
    }
}

fn add_parameter_meta(segments: &mut [Segment]) {
    let mut compare_part = String::new();
    for segment in segments.iter_mut().rev() {
        if segment.is_param() {
            segment.compare_part = compare_part.clone();
        } else {
            compare_part = segment.literal.clone();
            if compare_part.len() > 1 {
                compare_part = compare_part.trim_end_matches('/').to_owned();
            }
        }
    }

    let len = segments.len();
    for i in 0..len {
        let next_is_plain_param = segments
            .get(i + 1)
            .map_or(false, |next| next.is_param() && !next.greedy);
        let next_is_optional = segments.get(i + 1).map_or(false, |next| next.optional);

        let (head, tail) = segments.split_at_mut(i + 1);
        let segment = &mut head[i];
        if segment.is_param() {
            // two plain params back to back: the first takes a single character
            if !segment.greedy && next_is_plain_param {
                segment.length = 1;
            }
            if segment.compare_part.is_empty() {
                continue;
            }
            segment.part_count = tail
                .iter()
                .filter(|s| !s.is_param())
                .map(|s| s.literal.matches(segment.compare_part.as_str()).count())
                .sum();
        } else if segment.literal.ends_with('/') && (segment.last || next_is_optional) {
            segment.optional_slash = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(pattern: &str, path: &str) -> Option<Vec<String>> {
        let parsed = RoutePattern::parse(pattern);
        let mut slots = EMPTY_SLOTS;
        if !parsed.captures(path, &mut slots, false) {
            return None;
        }
        Some(
            slots[..parsed.params().len()]
                .iter()
                .map(|(start, end)| path[*start..*end].to_owned())
                .collect(),
        )
    }

    #[test]
    fn normalizes_case_and_trailing_slash() {
        let loose = RouteOptions::default();
        assert_eq!(normalize_path("/Users/", loose), "/users");
        assert_eq!(normalize_path("/", loose), "/");
        assert_eq!(normalize_path("/a//", loose), "/a/");

        let strict = RouteOptions {
            case_sensitive: true,
            strict_routing: true,
        };
        assert_eq!(normalize_path("/Users/", strict), "/Users/");
    }

    #[test]
    fn canonical_path_adds_leading_slash() {
        assert_eq!(canonical_path(""), "/");
        assert_eq!(canonical_path("users"), "/users");
        assert_eq!(canonical_path("/users"), "/users");
    }

    #[test]
    fn group_path_joins_prefixes() {
        assert_eq!(group_path("/api", ""), "/api");
        assert_eq!(group_path("/api/", "/users"), "/api/users");
        assert_eq!(group_path("/api", "users"), "/api/users");
        assert_eq!(group_path("/", "/users"), "/users");
    }

    #[test]
    fn compiles_literals_and_params_in_order() {
        let parsed = RoutePattern::parse("/shop/:category/:item");
        assert_eq!(parsed.params(), ["category", "item"]);
        let kinds: Vec<bool> = parsed.segments().iter().map(Segment::is_param).collect();
        assert_eq!(kinds, [false, true, false, true]);
        assert_eq!(parsed.segments()[0].literal_text(), "/shop/");
    }

    #[test]
    fn identical_input_compiles_identically() {
        assert_eq!(RoutePattern::parse("/a/:b/*"), RoutePattern::parse("/a/:b/*"));
    }

    #[test]
    fn wildcards_and_plus_params_are_numbered() {
        let parsed = RoutePattern::parse("/files/*/meta/+/*");
        assert_eq!(parsed.params(), ["*1", "+1", "*2"]);
    }

    #[test]
    fn escaped_characters_are_literal() {
        let parsed = RoutePattern::parse("/v1/some/resource/name\\:customVerb");
        assert!(parsed.params().is_empty());
        assert_eq!(capture("/v1/some/resource/name\\:customVerb", "/v1/some/resource/name:customVerb"), Some(vec![]));
    }

    #[test]
    fn tree_key_uses_first_literal() {
        assert_eq!(RoutePattern::parse("/api/:id").tree_key(), "/ap");
        assert_eq!(RoutePattern::parse("/:id").tree_key(), "");
        assert_eq!(RoutePattern::parse("/a").tree_key(), "");
    }

    #[test]
    fn captures_named_params() {
        assert_eq!(capture("/user/:name", "/user/john"), Some(vec!["john".into()]));
        assert_eq!(capture("/user/:name", "/user/john/extra"), None);
        assert_eq!(capture("/user/:name", "/user/"), None);
        assert_eq!(capture("/user/:name", "/users/john"), None);
    }

    #[test]
    fn captures_params_split_by_delimiters() {
        assert_eq!(
            capture("/flights/:from-:to", "/flights/lax-sfo"),
            Some(vec!["lax".into(), "sfo".into()])
        );
        assert_eq!(
            capture("/plantae/:genus.:species", "/plantae/prunus.persica"),
            Some(vec!["prunus".into(), "persica".into()])
        );
    }

    #[test]
    fn optional_param_may_be_absent() {
        assert_eq!(capture("/user/:name?", "/user"), Some(vec!["".into()]));
        assert_eq!(capture("/user/:name?", "/user/john"), Some(vec!["john".into()]));
    }

    #[test]
    fn greedy_params() {
        assert_eq!(capture("/src/*", "/src/a/b/c.rs"), Some(vec!["a/b/c.rs".into()]));
        assert_eq!(capture("/src/*", "/src"), Some(vec!["".into()]));
        assert_eq!(capture("/src/+", "/src/a/b"), Some(vec!["a/b".into()]));
        assert_eq!(capture("/src/+", "/src/"), None);
        assert_eq!(
            capture("/*/end", "/a/b/end"),
            Some(vec!["a/b".into()])
        );
    }

    #[test]
    fn plain_param_does_not_cross_slash_before_literal() {
        assert_eq!(capture("/api/:param/fixedEnd", "/api/123/fixedEnd"), Some(vec!["123".into()]));
        assert_eq!(capture("/api/:param/fixedEnd", "/api/123/456/fixedEnd"), None);
    }

    #[test]
    fn adjacent_params_take_one_character_first() {
        assert_eq!(capture("/:a:b", "/xyz"), Some(vec!["x".into(), "yz".into()]));
    }

    #[test]
    fn partial_match_allows_remainder() {
        let parsed = RoutePattern::parse("/api/:version");
        let mut slots = EMPTY_SLOTS;
        assert!(!parsed.captures("/api/v1/users", &mut slots, false));
        assert!(parsed.captures("/api/v1/users", &mut slots, true));
        assert_eq!(slots[0], (5, 7));
    }

    #[test]
    fn failed_match_leaves_slots_untouched() {
        let parsed = RoutePattern::parse("/a/:x/b");
        let mut slots = EMPTY_SLOTS;
        slots[0] = (9, 9);
        assert!(!parsed.captures("/a/1/c", &mut slots, false));
        assert_eq!(slots[0], (9, 9));
    }

    #[test]
    fn request_tree_key() {
        assert_eq!(tree_key("/api/users"), "/ap");
        assert_eq!(tree_key("/a"), "");
        assert_eq!(tree_key("/é"), "/é");
        assert_eq!(tree_key("/xé"), "");
    }
}
