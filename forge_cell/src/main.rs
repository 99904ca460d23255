use std::ffi::CString;
use std::ptr::{null, null_mut};

use clap::{App, Arg, ArgMatches};
use libc::*;
use seccomp_sys::*;

/// Exit code reserved for loader faults, so the runner can tell a
/// broken setup apart from a crashing judged program.
const SETUP_EXIT: i32 = 117;

fn main() {
    let cmd = App::new("forge_cell")
        .version("0.1.0")
        .about("Chroot loader for judged programs")
        .arg(
            Arg::with_name("root")
                .long("root")
                .help("directory to chroot into")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("cpu")
                .long("cpu")
                .help("CPU time limit (s)")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("memory")
                .long("memory")
                .help("address space limit (KB)")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("output")
                .long("output")
                .help("written file size limit (bytes)")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("procs")
                .long("procs")
                .help("process count limit")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("uid")
                .long("uid")
                .help("uid to drop to before exec")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("gid")
                .long("gid")
                .help("gid to drop to before exec")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("large-stack")
                .long("large-stack")
                .help("lift the stack size limit"),
        )
        .arg(
            Arg::with_name("stdin")
                .long("stdin")
                .help("redirect stdin from this file inside the root")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("stdout")
                .long("stdout")
                .help("redirect stdout to this file inside the root")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("stderr")
                .long("stderr")
                .help("redirect stderr to this file inside the root")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("raw")
                .multiple(true)
                .last(true)
                .required(true)
                .help("program path inside the root, then its arguments"),
        )
        .get_matches();

    let root = cmd.value_of("root").unwrap();
    let uid = parse_num(&cmd, "uid") as uid_t;
    let gid = parse_num(&cmd, "gid") as gid_t;

    let raw: Vec<&str> = cmd.values_of("raw").unwrap().collect();
    let program = CString::new(raw[0]).unwrap_or_else(|_| fail("bad program path"));
    let argv_owned: Vec<CString> = raw
        .iter()
        .map(|a| CString::new(*a).unwrap_or_else(|_| fail("bad argument")))
        .collect();
    let mut argv: Vec<*const c_char> = argv_owned.iter().map(|a| a.as_ptr()).collect();
    argv.push(null());

    enter_root(root);
    set_limits(&cmd);
    drop_privileges(uid, gid);
    redirect(&cmd, "stdin", O_RDONLY, STDIN_FILENO);
    redirect(&cmd, "stdout", O_WRONLY | O_CREAT | O_TRUNC, STDOUT_FILENO);
    redirect(&cmd, "stderr", O_WRONLY | O_CREAT | O_TRUNC, STDERR_FILENO);
    deny_network();

    unsafe {
        execvp(program.as_ptr(), argv.as_ptr());
    }
    // only reached when exec itself failed
    fail("exec failed");
}

fn fail(msg: &str) -> ! {
    eprintln!("cell: {}", msg);
    std::process::exit(SETUP_EXIT);
}

fn parse_num(cmd: &ArgMatches, name: &str) -> u64 {
    cmd.value_of(name)
        .unwrap()
        .trim()
        .parse::<u64>()
        .unwrap_or_else(|_| fail(name))
}

fn enter_root(root: &str) {
    let root = CString::new(root).unwrap_or_else(|_| fail("bad root path"));
    unsafe {
        if chroot(root.as_ptr()) != 0 {
            fail("chroot failed");
        }
        if chdir(b"/\0".as_ptr() as *const c_char) != 0 {
            fail("chdir failed");
        }
    }
}

fn set_rlimit(resource: __rlimit_resource_t, value: u64) {
    let lim = rlimit64 {
        rlim_cur: value,
        rlim_max: value,
    };
    unsafe {
        if setrlimit64(resource, &lim) != 0 {
            fail("setrlimit failed");
        }
    }
}

fn set_limits(cmd: &ArgMatches) {
    set_rlimit(RLIMIT_CPU, parse_num(cmd, "cpu"));
    // doubled so the kernel OOM-kills the process instead of failing
    // allocations right at the boundary
    set_rlimit(RLIMIT_AS, parse_num(cmd, "memory") << 10 << 1);
    set_rlimit(RLIMIT_FSIZE, parse_num(cmd, "output"));
    set_rlimit(RLIMIT_NPROC, parse_num(cmd, "procs"));
    set_rlimit(RLIMIT_CORE, 0);
    if cmd.is_present("large-stack") {
        set_rlimit(RLIMIT_STACK, RLIM64_INFINITY);
    }
}

fn drop_privileges(uid: uid_t, gid: gid_t) {
    unsafe {
        if setgroups(0, null_mut()) != 0 {
            fail("setgroups failed");
        }
        if setgid(gid) != 0 {
            fail("setgid failed");
        }
        if setuid(uid) != 0 {
            fail("setuid failed");
        }
    }
}

fn redirect(cmd: &ArgMatches, name: &str, flags: c_int, target_fd: c_int) {
    let path = match cmd.value_of(name) {
        Some(path) => path,
        None => return,
    };
    let path = CString::new(path).unwrap_or_else(|_| fail("bad redirection path"));
    unsafe {
        let fd = open(path.as_ptr(), flags, 0o644 as c_uint);
        if fd < 0 {
            fail("open for redirection failed");
        }
        if dup2(fd, target_fd) < 0 {
            fail("dup2 failed");
        }
        close(fd);
    }
}

/// Everything stays allowed except the socket family, which reports
/// EPERM so runtimes probing for network see a plain denial instead
/// of a kill.
fn deny_network() {
    unsafe {
        let ctx = seccomp_init(SCMP_ACT_ALLOW);
        if ctx.is_null() {
            fail("seccomp init failed");
        }
        let denied = [
            SYS_socket,
            SYS_socketpair,
            SYS_connect,
            SYS_accept,
            SYS_accept4,
            SYS_bind,
            SYS_listen,
            SYS_sendto,
            SYS_recvfrom,
            SYS_sendmsg,
            SYS_recvmsg,
        ];
        for id in &denied {
            if seccomp_rule_add(ctx, SCMP_ACT_ERRNO(EPERM as u32), *id as i32, 0) != 0 {
                fail("seccomp rule failed");
            }
        }
        if seccomp_load(ctx) != 0 {
            fail("seccomp load failed");
        }
        seccomp_release(ctx);
    }
}
