//! The hand-rolled parser for the query language: a tokenizer and a recursive-descent pass
//! producing [`Statement`]s. The database core never sees this syntax; it gets the parsed
//! values.

use libtrellis::{
    Aggregation, AggOp, Cmp, EdgeSpec, PatternEdge, Predicate, ProjectionItem, StructuredQuery,
    Value, VertexId, VertexSpec,
};

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("Unexpected character {0:?}")]
    UnexpectedChar(char),
    #[error("Unterminated string literal")]
    UnterminatedString,
    #[error("Couldn't parse the number {0:?}")]
    BadNumber(String),
    #[error("Expected {expected}, found {found}")]
    Unexpected {
        expected: &'static str,
        found: String,
    },
    #[error("Unexpected end of input")]
    UnexpectedEnd,
}

/// One statement of the query language.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// `CREATE (0:T {k:v})-[:TY {k:v}]->(1), …`
    Create(Vec<EdgeSpec>),
    /// `DELETE (0)->(1)` or `DELETE (0)-[:TY]->(1)`
    Delete {
        from: VertexId,
        to: VertexId,
        ty: Option<String>,
    },
    /// `MATCH pattern [WHERE …] [RETURN …]`
    Match(StructuredQuery),
    /// `CONTINUOUS MATCH pattern … FILE 'path'`
    ContinuousMatch { query: StructuredQuery, path: String },
    /// `exit`
    Exit,
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Colon,
    Dot,
    Star,
    Dash,
    Arrow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            _ if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '[' | ']' | '{' | '}' | ',' | ';' | ':' | '.' | '*' | '=' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    ',' => Token::Comma,
                    ';' => Token::Semi,
                    ':' => Token::Colon,
                    '.' => Token::Dot,
                    '*' => Token::Star,
                    _ => Token::Eq,
                });
            }
            '-' => {
                chars.next();
                if chars.peek() == Some(&'>') {
                    chars.next();
                    tokens.push(Token::Arrow);
                } else {
                    tokens.push(Token::Dash);
                }
            }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => {
                        chars.next();
                        tokens.push(Token::Le);
                    }
                    Some('>') => {
                        chars.next();
                        tokens.push(Token::Ne);
                    }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '\'' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        None => return Err(ParseError::UnterminatedString),
                        Some('\'') => break,
                        Some(ch) => s.push(ch),
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ if c.is_ascii_digit() => {
                let mut text = String::new();
                let mut is_float = false;
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() {
                        text.push(ch);
                        chars.next();
                    } else if ch == '.' && !is_float {
                        // Only a digit after the dot makes this a float; `1.` is an error.
                        let mut ahead = chars.clone();
                        ahead.next();
                        if ahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                            is_float = true;
                            text.push(ch);
                            chars.next();
                        } else {
                            break;
                        }
                    } else {
                        break;
                    }
                }
                if is_float {
                    let f = text
                        .parse::<f64>()
                        .map_err(|_| ParseError::BadNumber(text.clone()))?;
                    tokens.push(Token::Float(f));
                } else {
                    let i = text
                        .parse::<i64>()
                        .map_err(|_| ParseError::BadNumber(text.clone()))?;
                    tokens.push(Token::Int(i));
                }
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        s.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(s));
            }
            _ => return Err(ParseError::UnexpectedChar(c)),
        }
    }
    Ok(tokens)
}

/// Parses a single statement. A trailing semicolon is allowed; anything after it is not.
pub fn parse_statement(input: &str) -> Result<Statement, ParseError> {
    let mut p = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let stmt = p.statement()?;
    if p.peek() == Some(&Token::Semi) {
        p.pos += 1;
    }
    match p.peek() {
        None => Ok(stmt),
        Some(t) => Err(ParseError::Unexpected {
            expected: "end of statement",
            found: format!("{:?}", t),
        }),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        let t = self.tokens.get(self.pos).cloned().ok_or(ParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(t)
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.peek() == Some(t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: Token, expected: &'static str) -> Result<(), ParseError> {
        let found = self.next()?;
        if found == t {
            Ok(())
        } else {
            Err(ParseError::Unexpected {
                expected,
                found: format!("{:?}", found),
            })
        }
    }

    fn ident(&mut self, expected: &'static str) -> Result<String, ParseError> {
        match self.next()? {
            Token::Ident(s) => Ok(s),
            other => Err(ParseError::Unexpected {
                expected,
                found: format!("{:?}", other),
            }),
        }
    }

    // Peeks at a keyword without consuming it.
    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn statement(&mut self) -> Result<Statement, ParseError> {
        let kw = self.ident("a statement keyword")?;
        match kw.to_ascii_uppercase().as_str() {
            "CREATE" => self.create(),
            "DELETE" => self.delete(),
            "MATCH" => Ok(Statement::Match(self.match_query()?)),
            "CONTINUOUS" => {
                let m = self.ident("MATCH")?;
                if !m.eq_ignore_ascii_case("MATCH") {
                    return Err(ParseError::Unexpected {
                        expected: "MATCH",
                        found: m,
                    });
                }
                let query = self.match_query()?;
                if !self.at_keyword("FILE") {
                    return Err(ParseError::Unexpected {
                        expected: "FILE",
                        found: format!("{:?}", self.peek()),
                    });
                }
                self.pos += 1;
                let path = match self.next()? {
                    Token::Str(s) => s,
                    other => {
                        return Err(ParseError::Unexpected {
                            expected: "a quoted file path",
                            found: format!("{:?}", other),
                        });
                    }
                };
                Ok(Statement::ContinuousMatch { query, path })
            }
            "EXIT" => Ok(Statement::Exit),
            _ => Err(ParseError::Unexpected {
                expected: "CREATE, DELETE, MATCH, CONTINUOUS MATCH or exit",
                found: kw,
            }),
        }
    }

    fn create(&mut self) -> Result<Statement, ParseError> {
        let mut edges = Vec::new();
        loop {
            let from = self.create_vertex()?;
            let (ty, props) = self.edge_part()?;
            let to = self.create_vertex()?;
            edges.push(EdgeSpec {
                from,
                to,
                ty,
                props,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(Statement::Create(edges))
    }

    fn delete(&mut self) -> Result<Statement, ParseError> {
        let from = self.vertex_id()?;
        let (ty, _props) = self.edge_part()?;
        let to = self.vertex_id()?;
        Ok(Statement::Delete { from, to, ty })
    }

    // `( INT )`
    fn vertex_id(&mut self) -> Result<VertexId, ParseError> {
        self.expect(Token::LParen, "'('")?;
        let id = self.int_id()?;
        self.expect(Token::RParen, "')'")?;
        Ok(id)
    }

    fn int_id(&mut self) -> Result<VertexId, ParseError> {
        match self.next()? {
            Token::Int(i) if i >= 0 && i <= i64::from(u32::MAX) => Ok(i as VertexId),
            Token::Int(i) => Err(ParseError::BadNumber(i.to_string())),
            other => Err(ParseError::Unexpected {
                expected: "a vertex id",
                found: format!("{:?}", other),
            }),
        }
    }

    // `( INT (:Type)? ({props})? )`
    fn create_vertex(&mut self) -> Result<VertexSpec, ParseError> {
        self.expect(Token::LParen, "'('")?;
        let id = self.int_id()?;
        let ty = if self.eat(&Token::Colon) {
            Some(self.ident("a vertex type")?)
        } else {
            None
        };
        let props = if self.peek() == Some(&Token::LBrace) {
            self.props()?
        } else {
            Vec::new()
        };
        self.expect(Token::RParen, "')'")?;
        Ok(VertexSpec { id, ty, props })
    }

    // `->` or `-[var? (:TY)? ({props})?]->`; returns the type and properties. The edge
    // variable (meaningless outside MATCH) is parsed by `pattern_edge_part`.
    fn edge_part(&mut self) -> Result<(Option<String>, Vec<(String, Value)>), ParseError> {
        let (_var, ty, props) = self.pattern_edge_part()?;
        Ok((ty, props))
    }

    fn pattern_edge_part(
        &mut self,
    ) -> Result<(Option<String>, Option<String>, Vec<(String, Value)>), ParseError> {
        match self.next()? {
            Token::Arrow => Ok((None, None, Vec::new())),
            Token::Dash => {
                self.expect(Token::LBracket, "'['")?;
                let var = match self.peek() {
                    Some(Token::Ident(_)) => Some(self.ident("an edge variable")?),
                    _ => None,
                };
                let ty = if self.eat(&Token::Colon) {
                    Some(self.ident("an edge type")?)
                } else {
                    None
                };
                let props = if self.peek() == Some(&Token::LBrace) {
                    self.props()?
                } else {
                    Vec::new()
                };
                self.expect(Token::RBracket, "']'")?;
                self.expect(Token::Arrow, "'->'")?;
                Ok((var, ty, props))
            }
            other => Err(ParseError::Unexpected {
                expected: "'->' or '-['",
                found: format!("{:?}", other),
            }),
        }
    }

    // `{ key: literal, … }`
    fn props(&mut self) -> Result<Vec<(String, Value)>, ParseError> {
        self.expect(Token::LBrace, "'{'")?;
        let mut props = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(props);
        }
        loop {
            let key = self.ident("a property key")?;
            self.expect(Token::Colon, "':'")?;
            let value = self.literal()?;
            props.push((key, value));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(props)
    }

    fn literal(&mut self) -> Result<Value, ParseError> {
        let negate = self.eat(&Token::Dash);
        match self.next()? {
            Token::Int(i) => {
                let i = if negate { -i } else { i };
                i32::try_from(i)
                    .map(Value::Int)
                    .map_err(|_| ParseError::BadNumber(i.to_string()))
            }
            Token::Float(f) => Ok(Value::Double(if negate { -f } else { f })),
            Token::Str(s) if !negate => Ok(Value::Str(s)),
            Token::Ident(s) if !negate && s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Token::Ident(s) if !negate && s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            other => Err(ParseError::Unexpected {
                expected: "a literal",
                found: format!("{:?}", other),
            }),
        }
    }

    fn match_query(&mut self) -> Result<StructuredQuery, ParseError> {
        let mut query = StructuredQuery::default();
        loop {
            query.edges.push(self.pattern_edge()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        if self.at_keyword("WHERE") {
            self.pos += 1;
            loop {
                query.predicates.push(self.predicate()?);
                if self.at_keyword("AND") {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        if self.at_keyword("RETURN") {
            self.pos += 1;
            loop {
                self.return_item(&mut query)?;
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        Ok(query)
    }

    // `( var )-[e?:TY?]->( var )`
    fn pattern_edge(&mut self) -> Result<PatternEdge, ParseError> {
        self.expect(Token::LParen, "'('")?;
        let from = self.ident("a variable")?;
        self.expect(Token::RParen, "')'")?;
        let (var, ty, _props) = self.pattern_edge_part()?;
        self.expect(Token::LParen, "'('")?;
        let to = self.ident("a variable")?;
        self.expect(Token::RParen, "')'")?;
        Ok(PatternEdge { from, to, ty, var })
    }

    // `var.key CMP literal`
    fn predicate(&mut self) -> Result<Predicate, ParseError> {
        let var = self.ident("a variable")?;
        self.expect(Token::Dot, "'.'")?;
        let key = self.ident("a property key")?;
        let cmp = match self.next()? {
            Token::Eq => Cmp::Eq,
            Token::Ne => Cmp::Ne,
            Token::Lt => Cmp::Lt,
            Token::Le => Cmp::Le,
            Token::Gt => Cmp::Gt,
            Token::Ge => Cmp::Ge,
            other => {
                return Err(ParseError::Unexpected {
                    expected: "a comparison operator",
                    found: format!("{:?}", other),
                });
            }
        };
        let value = self.literal()?;
        Ok(Predicate {
            var,
            key,
            cmp,
            value,
        })
    }

    fn return_item(&mut self, query: &mut StructuredQuery) -> Result<(), ParseError> {
        let name = self.ident("a return item")?;
        let upper = name.to_ascii_uppercase();
        let agg_op = match upper.as_str() {
            "COUNT" => Some(AggOp::CountStar),
            "SUM" => Some(AggOp::Sum),
            "MIN" => Some(AggOp::Min),
            "MAX" => Some(AggOp::Max),
            "AVG" => Some(AggOp::Avg),
            _ => None,
        };
        // An aggregation keyword only counts as one when a parenthesis follows, so plain
        // variables may still be called `min`.
        if let (Some(op), Some(Token::LParen)) = (agg_op, self.peek()) {
            self.pos += 1;
            let over = if op == AggOp::CountStar {
                self.expect(Token::Star, "'*'")?;
                None
            } else {
                Some(self.projection_item()?)
            };
            self.expect(Token::RParen, "')'")?;
            query.aggregations.push(Aggregation { op, over });
        } else {
            let item = self.projection_rest(name)?;
            query.projection.push(item);
        }
        Ok(())
    }

    fn projection_item(&mut self) -> Result<ProjectionItem, ParseError> {
        let name = self.ident("a variable")?;
        self.projection_rest(name)
    }

    fn projection_rest(&mut self, name: String) -> Result<ProjectionItem, ParseError> {
        if self.eat(&Token::Dot) {
            let key = self.ident("a property key")?;
            Ok(ProjectionItem::Prop(name, key))
        } else {
            Ok(ProjectionItem::Var(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn create_with_types_and_props() {
        let stmt = parse_statement(
            "CREATE (0:Person {name:'ada', age:36})-[:KNOWS {weight:2}]->(1:Person), (1)->(2);",
        )
        .unwrap();
        let Statement::Create(edges) = stmt else {
            panic!("expected CREATE");
        };
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].ty.as_deref(), Some("KNOWS"));
        assert_eq!(edges[0].from.ty.as_deref(), Some("Person"));
        assert_eq!(
            edges[0].from.props,
            vec![
                ("name".to_owned(), Value::Str("ada".to_owned())),
                ("age".to_owned(), Value::Int(36)),
            ]
        );
        assert_eq!(edges[0].props, vec![("weight".to_owned(), Value::Int(2))]);
        assert_eq!(edges[1].ty, None);
        assert_eq!((edges[1].from.id, edges[1].to.id), (1, 2));
    }

    #[test]
    fn delete_with_and_without_type() {
        assert_eq!(
            parse_statement("DELETE (4)->(1);").unwrap(),
            Statement::Delete {
                from: 4,
                to: 1,
                ty: None
            }
        );
        assert_eq!(
            parse_statement("DELETE (0)-[:FOLLOWS]->(1);").unwrap(),
            Statement::Delete {
                from: 0,
                to: 1,
                ty: Some("FOLLOWS".to_owned())
            }
        );
    }

    #[test]
    fn match_with_where_and_return() {
        let stmt =
            parse_statement("MATCH (a)-[e:KNOWS]->(b), (b)->(c) WHERE a.age > 30 AND e.weight <= 2 RETURN b, a.name, COUNT(*);")
                .unwrap();
        let Statement::Match(q) = stmt else {
            panic!("expected MATCH");
        };
        assert_eq!(q.edges.len(), 2);
        assert_eq!(q.edges[0].var.as_deref(), Some("e"));
        assert_eq!(q.edges[0].ty.as_deref(), Some("KNOWS"));
        assert_eq!(q.edges[1].ty, None);
        assert_eq!(
            q.predicates,
            vec![
                Predicate {
                    var: "a".to_owned(),
                    key: "age".to_owned(),
                    cmp: Cmp::Gt,
                    value: Value::Int(30),
                },
                Predicate {
                    var: "e".to_owned(),
                    key: "weight".to_owned(),
                    cmp: Cmp::Le,
                    value: Value::Int(2),
                },
            ]
        );
        assert_eq!(
            q.projection,
            vec![
                ProjectionItem::Var("b".to_owned()),
                ProjectionItem::Prop("a".to_owned(), "name".to_owned()),
            ]
        );
        assert_eq!(
            q.aggregations,
            vec![Aggregation {
                op: AggOp::CountStar,
                over: None
            }]
        );
    }

    #[test]
    fn aggregations_take_items() {
        let stmt = parse_statement("MATCH (a)->(b) RETURN SUM(b.age), AVG(b.age);").unwrap();
        let Statement::Match(q) = stmt else {
            panic!("expected MATCH");
        };
        assert_eq!(q.projection, vec![]);
        assert_eq!(q.aggregations.len(), 2);
        assert_eq!(
            q.aggregations[0].over,
            Some(ProjectionItem::Prop("b".to_owned(), "age".to_owned()))
        );
    }

    #[test]
    fn continuous_match_takes_a_file() {
        let stmt =
            parse_statement("CONTINUOUS MATCH (a)->(b), (b)->(a) FILE 'out/deltas.txt';").unwrap();
        let Statement::ContinuousMatch { query, path } = stmt else {
            panic!("expected CONTINUOUS MATCH");
        };
        assert_eq!(query.edges.len(), 2);
        assert_eq!(path, "out/deltas.txt");
    }

    #[test]
    fn exit_is_case_insensitive_but_literal() {
        assert_eq!(parse_statement("exit;").unwrap(), Statement::Exit);
        assert_eq!(parse_statement("EXIT").unwrap(), Statement::Exit);
        assert!(parse_statement("exit now;").is_err());
    }

    #[test]
    fn negative_and_float_literals() {
        let stmt = parse_statement("CREATE (0 {x:-3, y:2.5, z:true})->(1);").unwrap();
        let Statement::Create(edges) = stmt else {
            panic!("expected CREATE");
        };
        assert_eq!(
            edges[0].from.props,
            vec![
                ("x".to_owned(), Value::Int(-3)),
                ("y".to_owned(), Value::Double(2.5)),
                ("z".to_owned(), Value::Bool(true)),
            ]
        );
    }

    #[test]
    fn errors_are_reported() {
        assert!(matches!(
            parse_statement("MATCH (a)->;"),
            Err(ParseError::Unexpected { .. })
        ));
        assert!(matches!(
            parse_statement("CREATE (0)->(1) garbage"),
            Err(ParseError::Unexpected { .. })
        ));
        assert!(matches!(
            parse_statement("CREATE (0 {s:'oops})->(1);"),
            Err(ParseError::UnterminatedString)
        ));
        assert!(matches!(parse_statement("MATCH (a)?->(b);"), Err(_)));
    }
}
