use std::process::Command;

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

/// 广度优先收集整棵进程树，根进程在最前
#[cfg(not(target_os = "windows"))]
fn collect_tree(root: u32) -> Vec<u32> {
    let mut tree = vec![root];
    let mut cursor = 0;

    while cursor < tree.len() {
        let parent = tree[cursor];
        cursor += 1;

        let Ok(listing) = Command::new("pgrep")
            .args(["-P", &parent.to_string()])
            .output()
        else {
            continue;
        };
        let found: Vec<u32> = String::from_utf8_lossy(&listing.stdout)
            .split_whitespace()
            .filter_map(|pid| pid.parse().ok())
            .filter(|pid| !tree.contains(pid))
            .collect();
        tree.extend(found);
    }

    tree
}

#[cfg(not(target_os = "windows"))]
fn send_term(pid: u32) -> Result<(), String> {
    let status = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .map_err(|e| format!("failed to signal {}: {}", pid, e))?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("kill -TERM {} exited with {}", pid, status))
    }
}

/// 向进程树发送终止信号（unix 为 SIGTERM），不等待退出
pub fn terminate_process_tree(pid: u32) -> Result<(), String> {
    #[cfg(target_os = "windows")]
    {
        let mut taskkill = Command::new("taskkill");
        taskkill.args(["/PID", &pid.to_string(), "/T", "/F"]);

        const CREATE_NO_WINDOW: u32 = 0x08000000;
        taskkill.creation_flags(CREATE_NO_WINDOW);

        taskkill
            .spawn()
            .map_err(|e| format!("failed to run taskkill for {}: {}", pid, e))?;

        return Ok(());
    }

    #[cfg(not(target_os = "windows"))]
    {
        // 叶子先收到信号；先杀父进程会让子进程被 init 收养而漏掉
        let tree = collect_tree(pid);
        for descendant in tree.iter().skip(1).rev() {
            let _ = send_term(*descendant);
        }

        return send_term(pid);
    }
}
