//! A `nom` parser for the §6 linker-script grammar subset.
//!
//! Grounded in `original_source/include/eld/Script/ScriptReader.h` for
//! which commands and expression builtins must round-trip; the concrete
//! combinator style follows `ferrum-object`'s use of `nom` for binary
//! formats, adapted here to a textual grammar.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_till, take_until, take_while1},
    character::complete::{alpha1, alphanumeric1, char, digit1, hex_digit1, multispace1, none_of, one_of},
    combinator::{map, map_res, opt, recognize, value},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::ast::*;

type ParseResult<'a, O> = IResult<&'a str, O>;

/// Parse a complete linker script, per the §6 command list.
pub fn parse_script(input: &str) -> ParseResult<'_, Script> {
    let (input, commands) = many0(preceded(skip, top_level_command))(input)?;
    let (input, _) = skip(input)?;

    let mut script = Script::default();
    for command in commands {
        match command {
            TopLevel::Entry(symbol) => script.entry = Some(symbol),
            TopLevel::Output(path) => script.output = Some(path),
            TopLevel::OutputFormat(format) => script.output_format = Some(format),
            TopLevel::OutputArch(arch) => script.output_arch = Some(arch),
            TopLevel::SearchDir(dir) => script.search_dirs.push(dir),
            TopLevel::Input(inputs) => script.inputs.extend(inputs),
            TopLevel::Extern(names) => script.externs.extend(names),
            TopLevel::Assert(expr, message) => script.asserts.push((expr, message)),
            TopLevel::Memory(regions) => script.memory = regions,
            TopLevel::Sections(commands) => script.sections = commands,
            TopLevel::Phdrs(phdrs) => script.phdrs = phdrs,
            TopLevel::Version(nodes) => script.version = nodes,
        }
    }

    Ok((input, script))
}

enum TopLevel {
    Entry(String),
    Output(String),
    OutputFormat(String),
    OutputArch(String),
    SearchDir(String),
    Input(Vec<ScriptInput>),
    Extern(Vec<String>),
    Assert(Expr, String),
    Memory(Vec<MemoryRegion>),
    Sections(Vec<OutputSectionCommand>),
    Phdrs(Vec<Phdr>),
    Version(Vec<VersionNode>),
}

fn top_level_command(input: &str) -> ParseResult<'_, TopLevel> {
    alt((
        map(keyword_paren("ENTRY", identifier), TopLevel::Entry),
        map(keyword_paren("OUTPUT_FORMAT", quoted_or_bare), TopLevel::OutputFormat),
        map(keyword_paren("OUTPUT_ARCH", quoted_or_bare), TopLevel::OutputArch),
        map(keyword_paren("OUTPUT", quoted_or_bare), TopLevel::Output),
        map(keyword_paren("SEARCH_DIR", quoted_or_bare), TopLevel::SearchDir),
        map(keyword_paren("STARTUP", quoted_or_bare), |path| {
            TopLevel::Input(vec![ScriptInput { path, as_needed: false, grouped: false }])
        }),
        map(keyword_paren("EXTERN", separated_list0(skip, identifier)), TopLevel::Extern),
        map(assert_command, |(expr, message)| TopLevel::Assert(expr, message)),
        map(input_list_command, TopLevel::Input),
        map(memory_block, TopLevel::Memory),
        map(sections_block, TopLevel::Sections),
        map(phdrs_block, TopLevel::Phdrs),
        map(version_block, TopLevel::Version),
        map(terminated(top_level_assignment, opt(preceded(skip, char(';')))), |assignment| {
            TopLevel::Sections(vec![OutputSectionCommand::Assignment(assignment)])
        }),
    ))(input)
}

fn assert_command(input: &str) -> ParseResult<'_, (Expr, String)> {
    preceded(
        pair(tag("ASSERT"), skip),
        delimited(
            char('('),
            tuple((expression, preceded(tuple((skip, char(','), skip)), quoted_string))),
            preceded(skip, char(')')),
        ),
    )(input)
}

fn input_list_command(input: &str) -> ParseResult<'_, Vec<ScriptInput>> {
    alt((
        map(keyword_paren("AS_NEEDED", separated_list0(skip, bare_input)), |inputs| {
            inputs.into_iter().map(|mut i| { i.as_needed = true; i }).collect()
        }),
        map(keyword_paren("GROUP", separated_list0(skip, bare_input)), |inputs| {
            inputs.into_iter().map(|mut i| { i.grouped = true; i }).collect()
        }),
        keyword_paren("INPUT", separated_list0(skip, bare_input)),
    ))(input)
}

fn bare_input(input: &str) -> ParseResult<'_, ScriptInput> {
    map(quoted_or_bare, |path| ScriptInput { path, as_needed: false, grouped: false })(input)
}

fn memory_block(input: &str) -> ParseResult<'_, Vec<MemoryRegion>> {
    preceded(
        pair(tag("MEMORY"), skip),
        delimited(char('{'), many0(preceded(skip, memory_region)), preceded(skip, char('}'))),
    )(input)
}

fn memory_region(input: &str) -> ParseResult<'_, MemoryRegion> {
    map(
        tuple((
            identifier,
            preceded(skip, delimited(char('('), take_till(|c| c == ')'), char(')'))),
            preceded(tuple((skip, char(':'), skip, tag("ORIGIN"), skip, char('='), skip)), expression),
            preceded(tuple((skip, char(','), skip, tag("LENGTH"), skip, char('='), skip)), expression),
            preceded(skip, opt(char(';'))),
        )),
        |(name, attributes, origin, length, _)| MemoryRegion {
            name,
            attributes: attributes.to_string(),
            origin,
            length,
        },
    )(input)
}

fn sections_block(input: &str) -> ParseResult<'_, Vec<OutputSectionCommand>> {
    preceded(
        pair(tag("SECTIONS"), skip),
        delimited(char('{'), many0(preceded(skip, sections_command)), preceded(skip, char('}'))),
    )(input)
}

fn sections_command(input: &str) -> ParseResult<'_, OutputSectionCommand> {
    alt((
        map(discard_section, OutputSectionCommand::Discard),
        map(output_section, OutputSectionCommand::Output),
        map(terminated(top_level_assignment, preceded(skip, char(';'))), OutputSectionCommand::Assignment),
    ))(input)
}

fn discard_section(input: &str) -> ParseResult<'_, Vec<InputSectionSpec>> {
    preceded(
        tuple((tag("/DISCARD/"), skip, char(':'), skip)),
        delimited(char('{'), many0(preceded(skip, input_section_spec)), preceded(skip, char('}'))),
    )(input)
}

fn output_section(input: &str) -> ParseResult<'_, OutputSection> {
    map(
        tuple((
            section_name,
            opt(preceded(skip, expression)),
            preceded(tuple((skip, char(':'), skip)), opt(preceded(tuple((tag("AT"), char('('))), terminated(expression, char(')'))))),
            preceded(
                skip,
                delimited(char('{'), many0(preceded(skip, section_content_command)), preceded(skip, char('}'))),
            ),
            opt(preceded(tuple((skip, char('>'))), identifier)),
            opt(preceded(tuple((skip, tag("AT>"))), identifier)),
            many0(preceded(tuple((skip, char(':'))), identifier)),
            opt(preceded(tuple((skip, char('='))), expression)),
        )),
        |(name, vma, at_lma, contents, region, lma_region, phdrs, fill)| OutputSection {
            name,
            vma,
            at_lma,
            align: None,
            subalign: None,
            contents,
            region,
            lma_region,
            phdrs,
            fill,
        },
    )(input)
}

fn section_name(input: &str) -> ParseResult<'_, String> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"), tag("."))),
            many0(alt((alphanumeric1, tag("_"), tag("."), tag("-")))),
        )),
        str::to_string,
    )(input)
}

fn section_content_command(input: &str) -> ParseResult<'_, SectionContentCommand> {
    alt((
        map(terminated(input_section_spec, opt(preceded(skip, char(';')))), SectionContentCommand::Input),
        map(
            terminated(
                tuple((data_width, preceded(tuple((skip, char('('))), terminated(expression, char(')'))))),
                preceded(skip, char(';')),
            ),
            |(width, value)| SectionContentCommand::Data { width, value },
        ),
        map(
            terminated(
                keyword_paren("FILL", expression),
                preceded(skip, char(';')),
            ),
            SectionContentCommand::Fill,
        ),
        map(terminated(top_level_assignment, preceded(skip, char(';'))), SectionContentCommand::Assignment),
    ))(input)
}

fn data_width(input: &str) -> ParseResult<'_, DataWidth> {
    alt((
        value(DataWidth::Byte, tag("BYTE")),
        value(DataWidth::Short, tag("SHORT")),
        value(DataWidth::Long, tag("LONG")),
        value(DataWidth::Quad, tag("QUAD")),
    ))(input)
}

fn input_section_spec(input: &str) -> ParseResult<'_, InputSectionSpec> {
    alt((
        map(keyword_paren("KEEP", input_section_spec_body), |mut spec| {
            spec.keep = true;
            spec
        }),
        input_section_spec_body,
    ))(input)
}

fn input_section_spec_body(input: &str) -> ParseResult<'_, InputSectionSpec> {
    map(
        tuple((
            file_pattern,
            many0(preceded(skip, keyword_paren("EXCLUDE_FILE", file_pattern))),
            preceded(skip, delimited(char('('), separated_list1(skip, sorted_pattern), preceded(skip, char(')')))),
        )),
        |(file_pattern, exclude_file, section_patterns)| InputSectionSpec {
            file_pattern,
            exclude_file,
            section_patterns,
            keep: false,
        },
    )(input)
}

fn file_pattern(input: &str) -> ParseResult<'_, String> {
    alt((
        quoted_string,
        map(take_while1(|c: char| c.is_alphanumeric() || "_.*?[]-/".contains(c)), str::to_string),
    ))(input)
}

fn sorted_pattern(input: &str) -> ParseResult<'_, SortedPattern> {
    alt((
        map(
            tuple((sort_key, preceded(skip, delimited(char('('), preceded(skip, sorted_pattern), preceded(skip, char(')'))))),
            |(key, mut inner)| {
                inner.sort.0.insert(0, key);
                inner
            },
        ),
        map(file_pattern, |pattern| SortedPattern { pattern, sort: SortChain::default() }),
    ))(input)
}

fn sort_key(input: &str) -> ParseResult<'_, SortKey> {
    alt((
        value(SortKey::Name, tag("SORT_BY_NAME")),
        value(SortKey::Alignment, tag("SORT_BY_ALIGNMENT")),
        value(SortKey::InitPriority, tag("SORT_BY_INIT_PRIORITY")),
        value(SortKey::None, tag("SORT_NONE")),
        value(SortKey::Name, tag("SORT")),
    ))(input)
}

fn top_level_assignment(input: &str) -> ParseResult<'_, Assignment> {
    alt((
        map(keyword_paren("PROVIDE_HIDDEN", assignment_body), |mut assignment| {
            assignment.provide = true;
            assignment.hidden = true;
            assignment
        }),
        map(keyword_paren("PROVIDE", assignment_body), |mut assignment| {
            assignment.provide = true;
            assignment
        }),
        map(keyword_paren("HIDDEN", assignment_body), |mut assignment| {
            assignment.hidden = true;
            assignment
        }),
        assignment_body,
    ))(input)
}

fn assignment_body(input: &str) -> ParseResult<'_, Assignment> {
    map(
        tuple((assignment_target, preceded(skip, assignment_op), preceded(skip, expression))),
        |(target, op, value)| Assignment { target, op, value, provide: false, hidden: false },
    )(input)
}

fn assignment_target(input: &str) -> ParseResult<'_, AssignmentTarget> {
    alt((value(AssignmentTarget::Dot, char('.')), map(identifier, AssignmentTarget::Symbol)))(input)
}

fn assignment_op(input: &str) -> ParseResult<'_, AssignmentOp> {
    alt((
        value(AssignmentOp::Add, tag("+=")),
        value(AssignmentOp::Sub, tag("-=")),
        value(AssignmentOp::Mul, tag("*=")),
        value(AssignmentOp::Div, tag("/=")),
        value(AssignmentOp::Set, tag("=")),
    ))(input)
}

fn phdrs_block(input: &str) -> ParseResult<'_, Vec<Phdr>> {
    preceded(
        pair(tag("PHDRS"), skip),
        delimited(char('{'), many0(preceded(skip, phdr_entry)), preceded(skip, char('}'))),
    )(input)
}

fn phdr_entry(input: &str) -> ParseResult<'_, Phdr> {
    map(
        terminated(
            tuple((
                identifier,
                preceded(skip, phdr_type),
                opt(preceded(skip, keyword_paren("FLAGS", map_res(hex_digit1_or_digit1, |s: &str| {
                    i64::from_str_radix(s.trim_start_matches("0x"), if s.starts_with("0x") { 16 } else { 10 })
                })))),
                opt(preceded(skip, keyword_paren("AT", expression))),
                map(opt(preceded(skip, tag("FILEHDR"))), |matched| matched.is_some()),
                map(opt(preceded(skip, tag("PHDRS"))), |matched| matched.is_some()),
            )),
            preceded(skip, char(';')),
        ),
        |(name, r#type, flags, at, filehdr, phdrs_flag)| Phdr {
            name,
            r#type,
            flags: flags.map(|value| value as u32),
            at,
            filehdr,
            phdrs_flag,
        },
    )(input)
}

fn hex_digit1_or_digit1(input: &str) -> ParseResult<'_, &str> {
    alt((recognize(preceded(tag("0x"), hex_digit1)), digit1))(input)
}

fn phdr_type(input: &str) -> ParseResult<'_, PhdrType> {
    alt((
        value(PhdrType::Load, tag("PT_LOAD")),
        value(PhdrType::Dynamic, tag("PT_DYNAMIC")),
        value(PhdrType::Interp, tag("PT_INTERP")),
        value(PhdrType::Note, tag("PT_NOTE")),
        value(PhdrType::Tls, tag("PT_TLS")),
        value(PhdrType::GnuStack, tag("PT_GNU_STACK")),
        value(PhdrType::GnuRelro, tag("PT_GNU_RELRO")),
        value(PhdrType::GnuEhFrame, tag("PT_GNU_EH_FRAME")),
    ))(input)
}

fn version_block(input: &str) -> ParseResult<'_, Vec<VersionNode>> {
    preceded(pair(tag("VERSION"), skip), delimited(char('{'), many0(preceded(skip, version_node)), preceded(skip, char('}'))))(input)
}

fn version_node(input: &str) -> ParseResult<'_, VersionNode> {
    map(
        tuple((
            opt(terminated(identifier, skip)),
            delimited(char('{'), many0(preceded(skip, version_scope_entry)), preceded(skip, char('}'))),
            preceded(skip, char(';')),
        )),
        |(name, entries, _)| {
            let mut node = VersionNode { name, globals: Vec::new(), locals: Vec::new() };
            for entry in entries {
                match entry {
                    VersionScopeEntry::Global(name) => node.globals.push(name),
                    VersionScopeEntry::Local(name) => node.locals.push(name),
                }
            }
            node
        },
    )(input)
}

enum VersionScopeEntry {
    Global(String),
    Local(String),
}

fn version_scope_entry(input: &str) -> ParseResult<'_, VersionScopeEntry> {
    alt((
        map(
            preceded(tuple((tag("global"), skip, char(':'), skip)), terminated(identifier, preceded(skip, char(';')))),
            VersionScopeEntry::Global,
        ),
        map(
            preceded(tuple((tag("local"), skip, char(':'), skip)), terminated(identifier, preceded(skip, char(';')))),
            VersionScopeEntry::Local,
        ),
    ))(input)
}

// --- Expressions, with the usual precedence climb -------------------------

fn expression(input: &str) -> ParseResult<'_, Expr> {
    ternary(input)
}

fn ternary(input: &str) -> ParseResult<'_, Expr> {
    map(
        tuple((
            logical_or,
            opt(preceded(
                tuple((skip, char('?'), skip)),
                tuple((expression, preceded(tuple((skip, char(':'), skip)), expression))),
            )),
        )),
        |(condition, rest)| match rest {
            Some((then, r#else)) => Expr::Ternary(Box::new(condition), Box::new(then), Box::new(r#else)),
            None => condition,
        },
    )(input)
}

macro_rules! left_assoc_binary {
    ($name:ident, $next:ident, $( $tag:literal => $op:expr ),+ $(,)?) => {
        fn $name(input: &str) -> ParseResult<'_, Expr> {
            let (input, first) = $next(input)?;
            let (input, rest) = many0(pair(
                preceded(skip, alt(($( value($op, tag($tag)) ),+))),
                preceded(skip, $next),
            ))(input)?;

            Ok((input, rest.into_iter().fold(first, |left, (op, right)| {
                Expr::Binary(Box::new(left), op, Box::new(right))
            })))
        }
    };
}

left_assoc_binary!(logical_or, logical_and, "||" => BinaryOp::Or);
left_assoc_binary!(logical_and, bit_or, "&&" => BinaryOp::And);
left_assoc_binary!(bit_or, bit_xor, "|" => BinaryOp::BitOr);
left_assoc_binary!(bit_xor, bit_and, "^" => BinaryOp::BitXor);
left_assoc_binary!(bit_and, equality, "&" => BinaryOp::BitAnd);
left_assoc_binary!(equality, relational, "==" => BinaryOp::Eq, "!=" => BinaryOp::Ne);
left_assoc_binary!(relational, shift, "<=" => BinaryOp::Le, ">=" => BinaryOp::Ge, "<" => BinaryOp::Lt, ">" => BinaryOp::Gt);
left_assoc_binary!(shift, additive, "<<" => BinaryOp::Shl, ">>" => BinaryOp::Shr);
left_assoc_binary!(additive, multiplicative, "+" => BinaryOp::Add, "-" => BinaryOp::Sub);
left_assoc_binary!(multiplicative, unary, "*" => BinaryOp::Mul, "/" => BinaryOp::Div, "%" => BinaryOp::Rem);

fn unary(input: &str) -> ParseResult<'_, Expr> {
    alt((
        map(preceded(pair(char('-'), skip), unary), |expr| Expr::Unary(UnaryOp::Neg, Box::new(expr))),
        map(preceded(pair(char('~'), skip), unary), |expr| Expr::Unary(UnaryOp::BitNot, Box::new(expr))),
        map(preceded(pair(char('!'), skip), unary), |expr| Expr::Unary(UnaryOp::Not, Box::new(expr))),
        primary,
    ))(input)
}

fn primary(input: &str) -> ParseResult<'_, Expr> {
    alt((
        delimited(pair(char('('), skip), expression, pair(skip, char(')'))),
        builtin_call,
        map(value(0i64, char('.')), |_| Expr::Dot),
        map(number, Expr::Number),
        map(identifier, Expr::Symbol),
    ))(input)
}

fn builtin_call(input: &str) -> ParseResult<'_, Expr> {
    let (input, builtin) = builtin_name(input)?;
    let (input, args) = preceded(
        skip,
        delimited(char('('), separated_list0(tuple((skip, char(','), skip)), expression), preceded(skip, char(')'))),
    )(input)?;

    Ok((input, Expr::Call(builtin, args)))
}

fn builtin_name(input: &str) -> ParseResult<'_, Builtin> {
    alt((
        value(Builtin::SizeOfHeaders, tag("SIZEOF_HEADERS")),
        value(Builtin::DataSegmentAlign, tag("DATA_SEGMENT_ALIGN")),
        value(Builtin::DataSegmentRelroEnd, tag("DATA_SEGMENT_RELRO_END")),
        value(Builtin::DataSegmentEnd, tag("DATA_SEGMENT_END")),
        value(Builtin::Align, tag("ALIGN")),
        value(Builtin::Addr, tag("ADDR")),
        value(Builtin::LoadAddr, tag("LOADADDR")),
        value(Builtin::SizeOf, tag("SIZEOF")),
        value(Builtin::Defined, tag("DEFINED")),
        value(Builtin::Origin, tag("ORIGIN")),
        value(Builtin::Length, tag("LENGTH")),
        value(Builtin::Max, tag("MAX")),
        value(Builtin::Min, tag("MIN")),
        value(Builtin::Absolute, tag("ABSOLUTE")),
        value(Builtin::Next, tag("NEXT")),
        value(Builtin::Constant, tag("CONSTANT")),
    ))(input)
}

fn number(input: &str) -> ParseResult<'_, i64> {
    map(
        tuple((
            alt((
                map_res(preceded(tag("0x"), hex_digit1), |digits| i64::from_str_radix(digits, 16)),
                map_res(digit1, str::parse),
            )),
            opt(one_of("KkMm")),
        )),
        |(value, suffix)| match suffix {
            Some('K') | Some('k') => value * 1024,
            Some('M') | Some('m') => value * 1024 * 1024,
            _ => value,
        },
    )(input)
}

fn identifier(input: &str) -> ParseResult<'_, String> {
    map(
        recognize(pair(alt((alpha1, tag("_"), tag("."))), many0(alt((alphanumeric1, tag("_"), tag(".")))))),
        str::to_string,
    )(input)
}

fn quoted_string(input: &str) -> ParseResult<'_, String> {
    delimited(
        char('"'),
        map(opt(escaped_transform(none_of("\"\\"), '\\', alt((value("\\", tag("\\")), value("\"", tag("\"")))))), |s| {
            s.unwrap_or_default()
        }),
        char('"'),
    )(input)
}

fn quoted_or_bare(input: &str) -> ParseResult<'_, String> {
    alt((quoted_string, map(take_while1(|c: char| !c.is_whitespace() && c != ')' && c != ','), str::to_string)))(input)
}

fn keyword_paren<'a, O>(
    keyword: &'static str,
    mut body: impl FnMut(&'a str) -> ParseResult<'a, O>,
) -> impl FnMut(&'a str) -> ParseResult<'a, O> {
    move |input: &'a str| {
        preceded(
            pair(tag(keyword), skip),
            delimited(char('('), preceded(skip, |i| body(i)), preceded(skip, char(')'))),
        )(input)
    }
}

/// Skip whitespace and `/* ... */` comments, the only comment style the
/// linker-script grammar supports.
fn skip(input: &str) -> ParseResult<'_, ()> {
    value((), many0(alt((value((), multispace1), value((), comment)))))(input)
}

fn comment(input: &str) -> ParseResult<'_, &str> {
    delimited(tag("/*"), take_until("*/"), tag("*/"))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_memory_and_a_minimal_sections_block() {
        let source = r#"
            MEMORY {
                RAM (rwx) : ORIGIN = 0x80000000, LENGTH = 0x1000
            }
            SECTIONS {
                .text : {
                    *(.text*)
                } >RAM
                .data : {
                    KEEP(*(.data.keep))
                    *(.data*)
                } >RAM
            }
        "#;

        let (rest, script) = parse_script(source).unwrap();
        assert_eq!(rest.trim(), "");
        assert_eq!(script.memory.len(), 1);
        assert_eq!(script.memory[0].name, "RAM");
        assert_eq!(script.sections.len(), 2);

        let OutputSectionCommand::Output(text) = &script.sections[0] else { panic!("expected output section") };
        assert_eq!(text.name, ".text");
        assert_eq!(text.region.as_deref(), Some("RAM"));
    }

    #[test]
    fn parses_entry_and_provide_and_dot_assignment() {
        let source = r#"
            ENTRY(_start)
            SECTIONS {
                . = 0x1000;
                PROVIDE(__bss_start = .);
                .bss : { *(.bss*) }
            }
        "#;

        let (_, script) = parse_script(source).unwrap();
        assert_eq!(script.entry.as_deref(), Some("_start"));

        let OutputSectionCommand::Assignment(dot) = &script.sections[0] else { panic!() };
        assert!(matches!(dot.target, AssignmentTarget::Dot));

        let OutputSectionCommand::Assignment(provide) = &script.sections[1] else { panic!() };
        assert!(provide.provide);
    }

    #[test]
    fn parses_sort_modifiers_and_discard() {
        let source = r#"
            SECTIONS {
                .text : { *(SORT_BY_ALIGNMENT(SORT_BY_INIT_PRIORITY(.text.*))) }
                /DISCARD/ : { *(.debug*) }
            }
        "#;

        let (_, script) = parse_script(source).unwrap();
        let OutputSectionCommand::Output(text) = &script.sections[0] else { panic!() };
        let SectionContentCommand::Input(spec) = &text.contents[0] else { panic!() };
        assert_eq!(spec.section_patterns[0].sort.0, vec![SortKey::Alignment, SortKey::InitPriority]);

        assert!(matches!(script.sections[1], OutputSectionCommand::Discard(_)));
    }

    #[test]
    fn parses_expressions_with_precedence() {
        let (_, expr) = expression("1 + 2 * 3").unwrap();
        let Expr::Binary(_, BinaryOp::Add, right) = expr else { panic!() };
        assert!(matches!(*right, Expr::Binary(_, BinaryOp::Mul, _)));
    }

    #[test]
    fn parses_builtin_calls() {
        let (_, expr) = expression("ALIGN(4096)").unwrap();
        assert!(matches!(expr, Expr::Call(Builtin::Align, _)));
    }
}
