// Listing tool: decode a .luac image and print its prototype tree,
// in the spirit of luac -l

use luabc::lua_vm::opcode::Instruction;
use luabc::{Chunk, LuaValue, read_chunk};
use std::env;
use std::fs;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    let Some(filename) = args.get(1) else {
        eprintln!("usage: bytecode_dump <chunk.luac>");
        process::exit(1);
    };

    let bytes = match fs::read(filename) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("bytecode_dump: cannot open {}: {}", filename, e);
            process::exit(1);
        }
    };

    match read_chunk(&bytes) {
        Ok(chunk) => dump_proto(&chunk, true),
        Err(e) => {
            eprintln!("bytecode_dump: {}: {}", filename, e);
            process::exit(1);
        }
    }
}

fn format_constant(value: &LuaValue) -> String {
    match value {
        LuaValue::String(s) => {
            let mut escaped = String::new();
            for &b in s.as_bytes() {
                match b {
                    b'\\' => escaped.push_str("\\\\"),
                    b'\n' => escaped.push_str("\\n"),
                    b'\r' => escaped.push_str("\\r"),
                    b'\t' => escaped.push_str("\\t"),
                    b'"' => escaped.push_str("\\\""),
                    0x20..=0x7E => escaped.push(b as char),
                    other => escaped.push_str(&format!("\\{:03}", other)),
                }
            }
            format!("\"{}\"", escaped)
        }
        other => format!("{:?}", other),
    }
}

fn dump_proto(proto: &Chunk, is_main: bool) {
    let kind = if is_main { "main" } else { "function" };
    println!(
        "{} <{}:{},{}> ({} instructions)",
        kind,
        proto.display_source(),
        proto.line_defined,
        proto.last_line_defined,
        proto.code.len()
    );
    println!(
        "{} params, {} slots, {} upvalues, {} constants, {} functions{}",
        proto.param_count,
        proto.max_stack_size,
        proto.upvalue_count,
        proto.constants.len(),
        proto.child_protos.len(),
        if proto.is_vararg { ", vararg" } else { "" }
    );

    for (pc, &word) in proto.code.iter().enumerate() {
        let line = proto.line_at(pc);
        match Instruction::decode(word) {
            Some(instr) => {
                println!("\t{}\t[{}]\t{}", pc + 1, line, instr.display());
            }
            None => {
                println!("\t{}\t[{}]\tUNKNOWN    {:#010x}", pc + 1, line, word);
            }
        }
    }

    if !proto.constants.is_empty() {
        println!("constants ({}):", proto.constants.len());
        for (i, value) in proto.constants.iter().enumerate() {
            println!("\t{}\t{}", i + 1, format_constant(value));
        }
    }

    if !proto.locals.is_empty() {
        println!("locals ({}):", proto.locals.len());
        for (i, local) in proto.locals.iter().enumerate() {
            println!(
                "\t{}\t{}\t{}\t{}",
                i,
                local.name.to_display(),
                local.start_pc + 1,
                local.end_pc + 1
            );
        }
    }

    if !proto.upvalue_names.is_empty() {
        println!("upvalues ({}):", proto.upvalue_names.len());
        for (i, name) in proto.upvalue_names.iter().enumerate() {
            println!("\t{}\t{}", i, name.to_display());
        }
    }

    for child in &proto.child_protos {
        println!();
        dump_proto(child, false);
    }
}
