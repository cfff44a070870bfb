use p9fs::{FileInfo, FsInfo, QId};

const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];

/// Size with a binary unit suffix, one decimal above bytes
pub fn human_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    match unit {
        0 => format!("{}{}", bytes, UNITS[0]),
        _ => format!("{:.1}{}", size, UNITS[unit]),
    }
}

/// One `ls` line, newline included
pub fn format_entry(info: &FileInfo, long: bool) -> String {
    let name = if info.is_dir() {
        format!("{}/", info.file_name)
    } else {
        info.file_name.clone()
    };
    if !long {
        return format!("{}\n", name);
    }

    format!(
        "{} {:>8} {} {}\n",
        if info.is_dir() { 'd' } else { '-' },
        human_size(info.file_size),
        info.modification_time.format("%Y-%m-%d %H:%M"),
        name
    )
}

pub fn format_stat(info: &FileInfo, qid: &QId) -> String {
    format!(
        "  File: {}\n  Size: {}\tAllocated: {}\n   Qid: type {:#04x} version {} path {:#x}\nAccess: {}\nModify: {}\nCreate: {}\n",
        info.file_name,
        info.file_size,
        info.physical_size,
        qid.typ.bits(),
        qid.version,
        qid.path,
        info.last_access_time.to_rfc3339(),
        info.modification_time.to_rfc3339(),
        info.create_time.to_rfc3339(),
    )
}

pub fn format_fs_info(info: &FsInfo) -> String {
    format!(
        "Label: {}\nBlock size: {}\nSize: {}\nFree: {}\nRead-only: {}\n",
        info.volume_label,
        info.block_size,
        human_size(info.volume_size),
        human_size(info.free_space),
        info.read_only
    )
}
