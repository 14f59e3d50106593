//! Minimal CSS selector support for [`MemoryDocument`](super::MemoryDocument)
//!
//! Supported: type selectors, `*`, `#id`, `.class`, `[attr]`, `[attr=value]`,
//! compound selectors, descendant and child (`>`) combinators, and
//! comma-separated groups. Anything else is rejected with a reason.

/// Read access to an element tree, as needed for matching
pub(crate) trait SelectorTarget {
    type Id: Copy;

    fn tag_name(&self, id: Self::Id) -> &str;
    fn attribute(&self, id: Self::Id, name: &str) -> Option<&str>;
    fn parent_element(&self, id: Self::Id) -> Option<Self::Id>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectorList {
    selectors: Vec<ComplexSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ComplexSelector {
    subject: Compound,
    /// Ancestor constraints, nearest first
    ancestors: Vec<(Combinator, Compound)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeMatch {
    name: String,
    value: Option<String>,
}

impl SelectorList {
    pub(crate) fn parse(input: &str) -> Result<Self, String> {
        Parser::new(input).parse_list()
    }

    pub(crate) fn matches<T: SelectorTarget>(&self, target: &T, id: T::Id) -> bool {
        self.selectors
            .iter()
            .any(|selector| selector.matches(target, id))
    }
}

impl ComplexSelector {
    fn matches<T: SelectorTarget>(&self, target: &T, id: T::Id) -> bool {
        self.subject.matches(target, id) && Self::ancestors_match(target, id, &self.ancestors)
    }

    fn ancestors_match<T: SelectorTarget>(
        target: &T,
        id: T::Id,
        rest: &[(Combinator, Compound)],
    ) -> bool {
        let Some(((combinator, compound), remaining)) = rest.split_first() else {
            return true;
        };

        match combinator {
            Combinator::Child => target.parent_element(id).is_some_and(|parent| {
                compound.matches(target, parent) && Self::ancestors_match(target, parent, remaining)
            }),
            Combinator::Descendant => {
                let mut current = target.parent_element(id);
                while let Some(ancestor) = current {
                    if compound.matches(target, ancestor)
                        && Self::ancestors_match(target, ancestor, remaining)
                    {
                        return true;
                    }
                    current = target.parent_element(ancestor);
                }
                false
            }
        }
    }
}

impl Compound {
    fn matches<T: SelectorTarget>(&self, target: &T, id: T::Id) -> bool {
        if let Some(tag) = &self.tag
            && !target.tag_name(id).eq_ignore_ascii_case(tag)
        {
            return false;
        }

        if !self
            .ids
            .iter()
            .all(|wanted| target.attribute(id, "id") == Some(wanted.as_str()))
        {
            return false;
        }

        let class_attr = target.attribute(id, "class").unwrap_or("");
        if !self
            .classes
            .iter()
            .all(|wanted| class_attr.split_ascii_whitespace().any(|c| c == wanted))
        {
            return false;
        }

        self.attributes.iter().all(|attr| {
            match (target.attribute(id, &attr.name), &attr.value) {
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => actual == expected,
                (None, _) => false,
            }
        })
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// Returns whether any whitespace was consumed
    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse_list(&mut self) -> Result<SelectorList, String> {
        let mut selectors = Vec::new();

        loop {
            self.skip_whitespace();
            selectors.push(self.parse_complex()?);
            self.skip_whitespace();

            match self.peek() {
                None => break,
                Some(',') => self.pos += 1,
                Some(c) => return Err(format!("unexpected character '{c}'")),
            }
        }

        Ok(SelectorList { selectors })
    }

    fn parse_complex(&mut self) -> Result<ComplexSelector, String> {
        let mut compounds = vec![self.parse_compound()?];
        let mut combinators = Vec::new();

        loop {
            let had_whitespace = self.skip_whitespace();
            match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    combinators.push(Combinator::Child);
                }
                Some(_) if had_whitespace => combinators.push(Combinator::Descendant),
                Some(c) => return Err(format!("unexpected character '{c}'")),
            }
            compounds.push(self.parse_compound()?);
        }

        let Some(subject) = compounds.pop() else {
            return Err("expected a selector".to_string());
        };
        let ancestors = combinators.into_iter().rev().zip(compounds.into_iter().rev()).collect();

        Ok(ComplexSelector { subject, ancestors })
    }

    fn parse_compound(&mut self) -> Result<Compound, String> {
        let mut compound = Compound::default();
        let mut matched_any = false;

        match self.peek() {
            Some('*') => {
                self.pos += 1;
                matched_any = true;
            }
            Some(c) if is_ident_start(c) => {
                compound.tag = Some(self.ident("tag")?.to_ascii_lowercase());
                matched_any = true;
            }
            _ => {}
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.ids.push(self.name("id")?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.name("class")?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attributes.push(self.parse_attribute()?);
                }
                _ => break,
            }
            matched_any = true;
        }

        if !matched_any {
            return Err(match self.peek() {
                None => "expected a selector".to_string(),
                Some(c) => format!("unexpected character '{c}'"),
            });
        }

        Ok(compound)
    }

    fn parse_attribute(&mut self) -> Result<AttributeMatch, String> {
        self.skip_whitespace();
        let name = self.name("attribute")?.to_ascii_lowercase();
        self.skip_whitespace();

        let value = match self.peek() {
            Some(']') => None,
            Some('=') => {
                self.pos += 1;
                self.skip_whitespace();
                let value = match self.peek() {
                    Some(quote @ ('"' | '\'')) => self.quoted(quote)?,
                    _ => self.ident("attribute value")?,
                };
                self.skip_whitespace();
                Some(value)
            }
            Some(c) => return Err(format!("unsupported attribute operator at '{c}'")),
            None => return Err("unterminated attribute selector".to_string()),
        };

        if self.peek() != Some(']') {
            return Err("unterminated attribute selector".to_string());
        }
        self.pos += 1;

        Ok(AttributeMatch { name, value })
    }

    /// An identifier that may not start with a digit
    fn name(&mut self, kind: &str) -> Result<String, String> {
        match self.peek() {
            Some(c) if is_ident_start(c) => self.ident(kind),
            Some(c) if is_ident_char(c) => Err(format!("{kind} name cannot start with '{c}'")),
            _ => Err(format!("expected {kind} name")),
        }
    }

    fn ident(&mut self, kind: &str) -> Result<String, String> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(format!("expected {kind} name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn quoted(&mut self, quote: char) -> Result<String, String> {
        self.pos += 1;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == quote {
                let value = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                return Ok(value);
            }
            self.pos += 1;
        }
        Err("unterminated string".to_string())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '-'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}
