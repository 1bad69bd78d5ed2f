//! Search query language accepted by the resource loader.
//!
//! ```text
//! name ~ web and (domain.name = example.com or not set? subnet)
//! hostgroup ^ (base, "web servers")
//! ```

use logos::Logos;
use serde_json::Value as JsonValue;
use snailquote::unescape;

use crate::Record;
use crate::StencilError;
use crate::StencilResult;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum RawToken {
	#[token("(")]
	OpenParen,
	#[token(")")]
	CloseParen,
	#[token(",")]
	Comma,
	#[token("&&")]
	AndSymbol,
	#[token("||")]
	OrSymbol,
	#[token("=")]
	Eq,
	#[token("!=")]
	NotEq,
	#[token("~")]
	Like,
	#[token("!~")]
	NotLike,
	#[token("^")]
	In,
	#[token("!^")]
	NotIn,
	#[token(">")]
	Gt,
	#[token(">=")]
	Ge,
	#[token("<")]
	Lt,
	#[token("<=")]
	Le,
	#[regex(r#""([^"\\]|\\.)*""#)]
	DoubleQuoted,
	#[regex(r"'([^'\\]|\\.)*'")]
	SingleQuoted,
	#[regex(r"[A-Za-z0-9_.:/@*+?\-]+")]
	Word,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
	OpenParen,
	CloseParen,
	Comma,
	And,
	Or,
	Not,
	Null,
	Set,
	Operator(Operator),
	InList { negated: bool },
	Word(String),
	Quoted(String),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
	Eq,
	NotEq,
	Like,
	NotLike,
	Gt,
	Ge,
	Lt,
	Le,
}

/// A single search condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
	Compare {
		field: String,
		operator: Operator,
		value: String,
	},
	InList {
		field: String,
		values: Vec<String>,
		negated: bool,
	},
	IsNull(String),
	IsSet(String),
	/// Bare text, matched as a case-insensitive substring of `name`.
	FreeText(String),
}

/// Parsed search predicate.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SearchQuery {
	/// The empty search, matching every row.
	#[default]
	All,
	Term(Term),
	Not(Box<SearchQuery>),
	And(Vec<SearchQuery>),
	Or(Vec<SearchQuery>),
}

/// Deepest nesting of parentheses and `not` a search may use.
pub const MAX_SEARCH_DEPTH: usize = 64;

impl SearchQuery {
	/// Parse search syntax. Blank input yields [`SearchQuery::All`].
	pub fn parse(input: &str) -> StencilResult<SearchQuery> {
		let tokens = lex(input)?;
		if tokens.is_empty() {
			return Ok(SearchQuery::All);
		}

		let mut parser = SearchParser {
			tokens,
			cursor: 0,
			end: input.len(),
			depth: 0,
		};
		let query = parser.parse_or()?;
		if let Some((_, offset)) = parser.tokens.get(parser.cursor) {
			return Err(syntax_error(*offset, "unexpected trailing input"));
		}

		Ok(query)
	}

	pub fn matches(&self, record: &Record) -> bool {
		match self {
			Self::All => true,
			Self::Term(term) => term.matches(record),
			Self::Not(inner) => !inner.matches(record),
			Self::And(terms) => terms.iter().all(|term| term.matches(record)),
			Self::Or(terms) => terms.iter().any(|term| term.matches(record)),
		}
	}
}

impl Term {
	fn matches(&self, record: &Record) -> bool {
		match self {
			Term::Compare {
				field,
				operator,
				value,
			} => {
				let candidates = scalar_strings(record.attribute(field));
				// Negated operators hold when no candidate matches.
				match operator {
					Operator::NotEq => !candidates.iter().any(|c| compare(c, Operator::Eq, value)),
					Operator::NotLike => {
						!candidates
							.iter()
							.any(|c| compare(c, Operator::Like, value))
					}
					_ => candidates.iter().any(|c| compare(c, *operator, value)),
				}
			}
			Term::InList {
				field,
				values,
				negated,
			} => {
				let candidates = scalar_strings(record.attribute(field));
				let found = candidates.iter().any(|c| values.contains(c));
				found != *negated
			}
			Term::IsNull(field) => record.attribute(field).is_none_or(|v| v.is_null()),
			Term::IsSet(field) => record.attribute(field).is_some_and(|v| !v.is_null()),
			Term::FreeText(text) => contains_ignore_case(&record.name, text),
		}
	}
}

fn compare(candidate: &str, operator: Operator, value: &str) -> bool {
	match operator {
		Operator::Eq => candidate == value,
		Operator::NotEq => candidate != value,
		Operator::Like => contains_ignore_case(candidate, value),
		Operator::NotLike => !contains_ignore_case(candidate, value),
		Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le => {
			let ordering = match (candidate.parse::<f64>(), value.parse::<f64>()) {
				(Ok(left), Ok(right)) => left.partial_cmp(&right),
				_ => Some(candidate.cmp(value)),
			};
			let Some(ordering) = ordering else {
				return false;
			};
			match operator {
				Operator::Gt => ordering.is_gt(),
				Operator::Ge => ordering.is_ge(),
				Operator::Lt => ordering.is_lt(),
				_ => ordering.is_le(),
			}
		}
	}
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
	haystack
		.to_lowercase()
		.contains(needle.to_lowercase().as_str())
}

/// Flatten an attribute into comparable strings. Sequences match when any
/// element matches.
fn scalar_strings(value: Option<JsonValue>) -> Vec<String> {
	match value {
		None | Some(JsonValue::Null) => Vec::new(),
		Some(JsonValue::String(s)) => vec![s],
		Some(JsonValue::Array(items)) => {
			items
				.into_iter()
				.flat_map(|item| scalar_strings(Some(item)))
				.collect()
		}
		Some(JsonValue::Object(map)) => {
			map.get("name")
				.map(|name| scalar_strings(Some(name.clone())))
				.unwrap_or_default()
		}
		Some(other) => vec![other.to_string()],
	}
}

fn syntax_error(offset: usize, reason: impl Into<String>) -> StencilError {
	StencilError::InvalidSearchSyntax {
		offset,
		reason: reason.into(),
	}
}

fn lex(input: &str) -> StencilResult<Vec<(Token, usize)>> {
	let mut tokens = Vec::new();

	for (raw, span) in RawToken::lexer(input).spanned() {
		let slice = &input[span.clone()];
		let Ok(raw) = raw else {
			return Err(syntax_error(
				span.start,
				format!("unexpected character `{slice}`"),
			));
		};

		let token = match raw {
			RawToken::OpenParen => Token::OpenParen,
			RawToken::CloseParen => Token::CloseParen,
			RawToken::Comma => Token::Comma,
			RawToken::AndSymbol => Token::And,
			RawToken::OrSymbol => Token::Or,
			RawToken::Eq => Token::Operator(Operator::Eq),
			RawToken::NotEq => Token::Operator(Operator::NotEq),
			RawToken::Like => Token::Operator(Operator::Like),
			RawToken::NotLike => Token::Operator(Operator::NotLike),
			RawToken::Gt => Token::Operator(Operator::Gt),
			RawToken::Ge => Token::Operator(Operator::Ge),
			RawToken::Lt => Token::Operator(Operator::Lt),
			RawToken::Le => Token::Operator(Operator::Le),
			RawToken::In => Token::InList { negated: false },
			RawToken::NotIn => Token::InList { negated: true },
			RawToken::DoubleQuoted | RawToken::SingleQuoted => {
				let text = unescape(slice)
					.map_err(|e| syntax_error(span.start, format!("invalid string: {e}")))?;
				Token::Quoted(text)
			}
			RawToken::Word => {
				match slice.to_ascii_lowercase().as_str() {
					"and" => Token::And,
					"or" => Token::Or,
					"not" => Token::Not,
					"null?" => Token::Null,
					"set?" => Token::Set,
					_ => Token::Word(slice.to_string()),
				}
			}
		};
		tokens.push((token, span.start));
	}

	Ok(tokens)
}

/// Recursive descent parser over the lexed tokens.
///
/// ```text
/// or    := and (("or" | "||") and)*
/// and   := unary (("and" | "&&")? unary)*
/// unary := "not" unary | primary
/// primary := "(" or ")" | ("null?" | "set?") word | value [op value | in-list]
/// ```
struct SearchParser {
	tokens: Vec<(Token, usize)>,
	cursor: usize,
	end: usize,
	depth: usize,
}

impl SearchParser {
	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.cursor).map(|(token, _)| token)
	}

	fn offset(&self) -> usize {
		self.tokens
			.get(self.cursor)
			.map_or(self.end, |(_, offset)| *offset)
	}

	fn next(&mut self) -> Option<Token> {
		let token = self.tokens.get(self.cursor).map(|(token, _)| token.clone());
		if token.is_some() {
			self.cursor += 1;
		}
		token
	}

	/// Enter one level of parentheses or `not`.
	fn descend(&mut self, offset: usize) -> StencilResult<()> {
		if self.depth >= MAX_SEARCH_DEPTH {
			return Err(syntax_error(offset, "search nested too deeply"));
		}
		self.depth += 1;
		Ok(())
	}

	fn parse_or(&mut self) -> StencilResult<SearchQuery> {
		let mut terms = vec![self.parse_and()?];
		while self.peek() == Some(&Token::Or) {
			self.cursor += 1;
			terms.push(self.parse_and()?);
		}
		Ok(if terms.len() == 1 {
			terms.remove(0)
		} else {
			SearchQuery::Or(terms)
		})
	}

	fn parse_and(&mut self) -> StencilResult<SearchQuery> {
		let mut terms = vec![self.parse_unary()?];
		loop {
			match self.peek() {
				Some(Token::And) => {
					self.cursor += 1;
				}
				// Adjacent terms are an implicit conjunction.
				Some(
					Token::Not
					| Token::Null
					| Token::Set
					| Token::OpenParen
					| Token::Word(_)
					| Token::Quoted(_),
				) => {}
				_ => break,
			}
			terms.push(self.parse_unary()?);
		}
		Ok(if terms.len() == 1 {
			terms.remove(0)
		} else {
			SearchQuery::And(terms)
		})
	}

	fn parse_unary(&mut self) -> StencilResult<SearchQuery> {
		if self.peek() == Some(&Token::Not) {
			self.descend(self.offset())?;
			self.cursor += 1;
			let inner = self.parse_unary()?;
			self.depth -= 1;
			return Ok(SearchQuery::Not(Box::new(inner)));
		}
		self.parse_primary()
	}

	fn parse_primary(&mut self) -> StencilResult<SearchQuery> {
		let offset = self.offset();
		match self.next() {
			Some(Token::OpenParen) => {
				self.descend(offset)?;
				let inner = self.parse_or()?;
				self.depth -= 1;
				match self.next() {
					Some(Token::CloseParen) => Ok(inner),
					_ => Err(syntax_error(offset, "unclosed parenthesis")),
				}
			}
			Some(Token::Null) => {
				let field = self.expect_field()?;
				Ok(SearchQuery::Term(Term::IsNull(field)))
			}
			Some(Token::Set) => {
				let field = self.expect_field()?;
				Ok(SearchQuery::Term(Term::IsSet(field)))
			}
			Some(Token::Quoted(text)) => Ok(SearchQuery::Term(Term::FreeText(text))),
			Some(Token::Word(word)) => self.parse_condition(word),
			Some(Token::CloseParen) => Err(syntax_error(offset, "unexpected `)`")),
			Some(Token::Operator(_) | Token::InList { .. }) => {
				Err(syntax_error(offset, "expected a field name"))
			}
			Some(_) => Err(syntax_error(offset, "expected a search term")),
			None => Err(syntax_error(offset, "unexpected end of search")),
		}
	}

	fn parse_condition(&mut self, field: String) -> StencilResult<SearchQuery> {
		match self.peek() {
			Some(Token::Operator(operator)) => {
				let operator = *operator;
				self.cursor += 1;
				let value = self.expect_value()?;
				Ok(SearchQuery::Term(Term::Compare {
					field,
					operator,
					value,
				}))
			}
			Some(Token::InList { negated }) => {
				let negated = *negated;
				self.cursor += 1;
				let values = self.parse_list()?;
				Ok(SearchQuery::Term(Term::InList {
					field,
					values,
					negated,
				}))
			}
			_ => Ok(SearchQuery::Term(Term::FreeText(field))),
		}
	}

	fn parse_list(&mut self) -> StencilResult<Vec<String>> {
		let offset = self.offset();
		if self.next() != Some(Token::OpenParen) {
			return Err(syntax_error(offset, "expected `(` to start a value list"));
		}

		let mut values = vec![self.expect_value()?];
		loop {
			let offset = self.offset();
			match self.next() {
				Some(Token::Comma) => values.push(self.expect_value()?),
				Some(Token::CloseParen) => return Ok(values),
				_ => return Err(syntax_error(offset, "expected `,` or `)` in value list")),
			}
		}
	}

	fn expect_field(&mut self) -> StencilResult<String> {
		let offset = self.offset();
		match self.next() {
			Some(Token::Word(word)) => Ok(word),
			_ => Err(syntax_error(offset, "expected a field name")),
		}
	}

	fn expect_value(&mut self) -> StencilResult<String> {
		let offset = self.offset();
		match self.next() {
			Some(Token::Word(word) | Token::Quoted(word)) => Ok(word),
			_ => Err(syntax_error(offset, "expected a value")),
		}
	}
}
