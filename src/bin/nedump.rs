//! Command-line dump tool: decodes an NE image and prints its headers,
//! segments, entry points, and CS:IP, mirroring `win16ne`'s `describe()`
//! text dump and replacing the teacher's old `LinearExecutableLayout`
//! debug driver in `src/main.rs` (SPEC_FULL.md §C).

use std::env;
use std::process::ExitCode;

use ne286rt::ne::ParserImage;
use ne286rt::resolve::ExportTable;

fn main() -> ExitCode {
    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: nedump <path-to-ne-executable>");
        return ExitCode::FAILURE;
    };

    let image = match ParserImage::parse_file(&path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("{path}: {}", e.strerror());
            return ExitCode::FAILURE;
        }
    };

    describe(&image);
    ExitCode::SUCCESS
}

fn describe(image: &ne286rt::ne::ParserImage) {
    let header = &image.header;
    println!("linker version: {}.{}", header.e_link_maj, header.e_link_min);
    println!("flags: {:?}", header.flags());
    println!("segments: {}", image.segments.len());
    for (i, seg) in image.segments.iter().enumerate() {
        println!(
            "  [{:>3}] flags={:?} on_disk={:#06x} min_alloc={:#06x} reloc={}",
            i + 1,
            seg.flags,
            seg.on_disk_length(),
            seg.min_alloc(),
            seg.has_relocations(),
        );
    }
    println!(
        "entry CS:IP = {}:{:#06x}",
        (header.e_csip >> 16) & 0xFFFF,
        header.e_csip & 0xFFFF
    );
    println!(
        "entry SS:SP = {}:{:#06x}",
        (header.e_sssp >> 16) & 0xFFFF,
        header.e_sssp & 0xFFFF
    );

    if let Some(name) = image.resident_names.module_name() {
        println!("module name: {}", String::from_utf8_lossy(name));
    }

    let exports = ExportTable::build(&image.entry_table, &image.resident_names);
    println!("exports: {}", exports.exports.len());
    for export in &exports.exports {
        match &export.name {
            Some(name) => println!(
                "  #{:<5} {}  (seg {}, off {:#06x})",
                export.ordinal,
                String::from_utf8_lossy(name),
                export.segment,
                export.offset
            ),
            None => println!(
                "  #{:<5} <unnamed>  (seg {}, off {:#06x})",
                export.ordinal, export.segment, export.offset
            ),
        }
    }

    println!("resources: {}", image.resources.entries.len());
}
