use regex_lite::Regex;

/// One configuration line with links to its parent and direct children
#[derive(Debug, Clone)]
struct Line {
    text: String,
    indent: usize,
    children: Vec<usize>,
}

/// Indentation-based tree over IOS configuration text
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    lines: Vec<Line>,
}

/// Borrowed view of a line inside a [`ConfigTree`]
#[derive(Debug, Clone, Copy)]
pub struct ConfigObject<'a> {
    tree: &'a ConfigTree,
    idx: usize,
}

impl<'a> ConfigObject<'a> {
    pub fn text(&self) -> &'a str {
        &self.tree.lines[self.idx].text
    }

    /// Direct children, one indentation level deeper
    pub fn children(&self) -> impl Iterator<Item = ConfigObject<'a>> + 'a {
        let tree = self.tree;
        tree.lines[self.idx]
            .children
            .iter()
            .map(move |&idx| ConfigObject { tree, idx })
    }

    pub fn has_child(&self, re: &Regex) -> bool {
        self.children().any(|c| re.is_match(c.text()))
    }
}

impl ConfigTree {
    /// Build the tree. Blank lines are dropped, a line belongs to the nearest
    /// preceding line with a smaller indent.
    pub fn parse(text: &str) -> Self {
        let mut lines: Vec<Line> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();

        for raw in text.lines() {
            let line = raw.trim_end_matches('\r').trim_end();
            if line.trim().is_empty() {
                continue;
            }
            let indent = line.len() - line.trim_start().len();
            while let Some(&top) = stack.last() {
                if lines[top].indent >= indent {
                    stack.pop();
                } else {
                    break;
                }
            }

            let idx = lines.len();
            if let Some(&parent) = stack.last() {
                lines[parent].children.push(idx);
            }
            lines.push(Line {
                text: line.to_string(),
                indent,
                children: Vec::new(),
            });
            stack.push(idx);
        }

        Self { lines }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn objects(&self) -> impl Iterator<Item = ConfigObject<'_>> {
        (0..self.lines.len()).map(move |idx| ConfigObject { tree: self, idx })
    }

    /// All lines matching `re`, at any depth
    pub fn find_objects(&self, re: &Regex) -> Vec<ConfigObject<'_>> {
        self.objects().filter(|o| re.is_match(o.text())).collect()
    }

    /// Lines matching `parent` that have a direct child matching `child`
    pub fn find_objects_w_child(&self, parent: &Regex, child: &Regex) -> Vec<ConfigObject<'_>> {
        self.objects()
            .filter(|o| parent.is_match(o.text()) && o.has_child(child))
            .collect()
    }

    /// Lines matching `parent` with no direct child matching `child`
    pub fn find_objects_wo_child(&self, parent: &Regex, child: &Regex) -> Vec<ConfigObject<'_>> {
        self.objects()
            .filter(|o| parent.is_match(o.text()) && !o.has_child(child))
            .collect()
    }

    /// First capture group of the first matching line, or `default`
    pub fn re_match_typed(&self, re: &Regex, default: &str) -> String {
        self.lines
            .iter()
            .find_map(|l| re.captures(&l.text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()))
            .unwrap_or_else(|| default.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "\
hostname core-sw1
!
interface Vlan10
 description users
 ip address 10.10.0.1 255.255.255.0
!
interface GigabitEthernet0/1
 switchport mode access
 switchport access vlan 10
!
interface GigabitEthernet0/2
 no ip address
 shutdown
!
router ospf 1
 network 10.0.0.0 0.255.255.255 area 0
  ! nested comment
";

    fn re(s: &str) -> Regex {
        Regex::new(s).unwrap()
    }

    #[test]
    fn test_parse_children() {
        let tree = ConfigTree::parse(CONFIG);
        let ospf = tree.find_objects(&re(r"^router ospf"));
        assert_eq!(ospf.len(), 1);
        let children: Vec<_> = ospf[0].children().map(|c| c.text().to_string()).collect();
        assert_eq!(children, vec![" network 10.0.0.0 0.255.255.255 area 0"]);
        // grandchildren hang off the network line, not the router block
        let network = ospf[0].children().next().unwrap();
        assert_eq!(network.children().count(), 1);
    }

    #[test]
    fn test_find_with_and_without_child() {
        let tree = ConfigTree::parse(CONFIG);
        let l3 = tree.find_objects_w_child(&re(r"^interface"), &re(r"^\s*ip address"));
        assert_eq!(l3.len(), 1);
        assert_eq!(l3[0].text(), "interface Vlan10");

        let l2 = tree.find_objects_wo_child(&re(r"^interface"), &re(r"^\s*(no)?\s*ip address"));
        assert_eq!(l2.len(), 1);
        assert_eq!(l2[0].text(), "interface GigabitEthernet0/1");
    }

    #[test]
    fn test_re_match_typed() {
        let tree = ConfigTree::parse(CONFIG);
        assert_eq!(tree.re_match_typed(&re(r"^hostname\s+(\S+)"), "None"), "core-sw1");
        assert_eq!(tree.re_match_typed(&re(r"^domain\s+(\S+)"), "None"), "None");
    }

    #[test]
    fn test_blank_and_crlf_lines() {
        let tree = ConfigTree::parse("interface Gi0/1\r\n\r\n description x\r\n");
        assert_eq!(tree.len(), 2);
        let obj = &tree.find_objects(&re(r"^interface"))[0];
        assert_eq!(obj.children().next().unwrap().text(), " description x");
    }
}
